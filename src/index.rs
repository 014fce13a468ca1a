use crate::prelude::*;

/// Sorted map interface shared by every tree in the crate.
///
/// Changes become durable only on [`TreeIndex::commit`]; [`TreeIndex::abort`] drops
/// everything since the last commit.
pub trait TreeIndex<K, V> {
    /// Returns the value stored for `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    fn get(&mut self, key: &K) -> Result<V>;

    /// Stores `value` for `key`, replacing any previous value.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the key or value cannot be stored.
    fn set(&mut self, key: K, value: V) -> Result<()>;

    /// Removes `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    fn remove_key(&mut self, key: &K) -> Result<()>;

    /// Returns the smallest key, `None` for an empty tree.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    fn first_key(&mut self) -> Result<Option<K>>;

    /// Returns the smallest key greater than `after`, `None` past the last key.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    fn next_key(&mut self, after: &K) -> Result<Option<K>>;

    /// Checks if `key` is present.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    fn contains_key(&mut self, key: &K) -> Result<bool>;

    /// Replaces the value of an existing key; returns `false` if the key is absent.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    fn update_key(&mut self, key: &K, value: V) -> Result<bool>;

    /// Makes every change since the last commit durable.
    ///
    /// # Errors
    /// Fails on I/O error.
    fn commit(&mut self) -> Result<()>;

    /// Drops every change since the last commit.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    fn abort(&mut self) -> Result<()>;

    /// Checks the structure; `correct_errors` reclaims space leaked by a crash.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] on anomalies that are not corrected.
    fn recover(&mut self, correct_errors: bool) -> Result<()>;

    /// Bounds the number of nodes kept in memory.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `limit` is too small.
    fn set_footprint_limit(&mut self, limit: usize) -> Result<()>;

    /// Flushes the streams without committing.
    ///
    /// # Errors
    /// Fails on I/O error.
    fn shutdown(&mut self) -> Result<()>;

    /// Iterates over the keys in order starting after `after`, or from the first key.
    fn keys_from(&mut self, after: Option<K>) -> Keys<'_, K, V, Self>
    where
        Self: Sized,
    {
        Keys {
            index: self,
            state: match after {
                Some(key) => KeysState::After(key),
                None => KeysState::Start,
            },
            marker: PhantomData,
        }
    }
}

/// Iterator over the keys of a [`TreeIndex`], see [`TreeIndex::keys_from`].
#[derive(Debug)]
pub struct Keys<'a, K, V, T> {
    index: &'a mut T,
    state: KeysState<K>,
    marker: PhantomData<V>,
}

#[derive(Debug)]
enum KeysState<K> {
    Start,
    After(K),
    Done,
}

impl<'a, K: Clone, V, T: TreeIndex<K, V>> Iterator for Keys<'a, K, V, T> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Result<K>> {
        let next = match std::mem::replace(&mut self.state, KeysState::Done) {
            KeysState::Start => self.index.first_key(),
            KeysState::After(key) => self.index.next_key(&key),
            KeysState::Done => return None,
        };
        match next {
            Ok(Some(key)) => {
                self.state = KeysState::After(key.clone());
                Some(Ok(key))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
