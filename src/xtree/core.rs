use super::prelude::*;

/// Byte tree for keys of any length.
///
/// Only a prefix of each key is indexed: the inner [`BplusTreeBytes`] maps every prefix to
/// an [`XBucket`] holding all keys that share it. By default the prefix is the longest
/// leading part of the key that fits in `prefix_length` bytes.
pub struct XBplusTreeBytes<K, S> {
    tree: BplusTreeBytes<K, S>,
    prefix_length: usize,
    bucket_size_limit: Option<usize>,
    compare: Comparator<K>,
    prefix_for: PrefixFn<K>,
}

impl<K, S> Debug for XBplusTreeBytes<K, S>
where
    BplusTreeBytes<K, S>: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("XBplusTreeBytes")
            .field("tree", &self.tree)
            .field("prefix_length", &self.prefix_length)
            .field("bucket_size_limit", &self.bucket_size_limit)
            .finish()
    }
}

fn truncated_prefix<K: Key>(key: &K, prefix_length: usize) -> Result<K> {
    Ok(key.prefix(prefix_length))
}

impl<K: Key, S: Stream> XBplusTreeBytes<K, S> {
    /// Wraps `tree`, indexing keys by their leading `prefix_length` bytes.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `prefix_length` is below 3 or longer than the
    /// keys of `tree`.
    pub fn new(tree: BplusTreeBytes<K, S>, prefix_length: usize, compare: Comparator<K>) -> Result<Self> {
        Self::with_prefix(tree, prefix_length, compare, truncated_prefix)
    }

    pub(super) fn with_prefix(
        tree: BplusTreeBytes<K, S>,
        prefix_length: usize,
        compare: Comparator<K>,
        prefix_for: PrefixFn<K>,
    ) -> Result<Self> {
        if prefix_length < MIN_PREFIX_LENGTH {
            let cause = format!(
                "prefix length must be at least {}: {}",
                MIN_PREFIX_LENGTH, prefix_length
            );
            return Err(Error::config(cause).into());
        }
        if prefix_length > tree.max_key_length() {
            let cause = format!(
                "prefix length {} exceeds key length {} of the inner tree",
                prefix_length,
                tree.max_key_length()
            );
            return Err(Error::config(cause).into());
        }
        Ok(Self {
            tree,
            prefix_length,
            bucket_size_limit: None,
            compare,
            prefix_for,
        })
    }

    /// Creates an empty tree in the two streams.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] on out of range parameters.
    pub fn initialize(
        tree_stream: S,
        block_stream: S,
        prefix_length: usize,
        culture_id: i32,
        node_size: usize,
        buffer_size: usize,
        compare: Comparator<K>,
    ) -> Result<Self> {
        let tree = BplusTreeBytes::initialize(
            tree_stream,
            block_stream,
            prefix_length,
            culture_id,
            node_size,
            buffer_size,
            compare,
        )?;
        Self::new(tree, prefix_length, compare)
    }

    /// Opens a tree; the prefix length is the key length of the inner tree.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if either stream holds no valid header.
    pub fn reopen(tree_stream: S, block_stream: S, compare: Comparator<K>) -> Result<Self> {
        let tree = BplusTreeBytes::reopen(tree_stream, block_stream, compare)?;
        let prefix_length = tree.max_key_length();
        Self::new(tree, prefix_length, compare)
    }

    /// Maximum bytes of a key indexed by the inner tree.
    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    /// Limits the number of keys sharing a prefix; `None` lifts the limit.
    pub fn limit_bucket_size(&mut self, limit: Option<usize>) {
        self.bucket_size_limit = limit;
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    /// Fails on I/O error or a damaged bucket.
    pub fn try_get(&mut self, key: &K) -> Result<Option<Vec<u8>>> {
        let (_, bucket) = self.find_bucket(key, false)?;
        Ok(bucket.and_then(|bucket| bucket.find(key).map(<[u8]>::to_vec)))
    }

    /// Returns the value stored for `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    pub fn get(&mut self, key: &K) -> Result<Vec<u8>> {
        self.try_get(key)?
            .ok_or_else(|| Error::key_missing(format!("key not found: {:?}", key)).into())
    }

    /// Stores `value` for `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the bucket of `key` is full; the tree is
    /// unchanged then.
    pub fn set(&mut self, key: K, value: Vec<u8>) -> Result<()> {
        let (prefix, bucket) = self.find_bucket(&key, false)?;
        let mut bucket = bucket.unwrap_or_else(|| XBucket::new(self.compare));
        bucket.add(key, value, self.bucket_size_limit)?;
        trace!("bucket {:?} now holds {} keys", prefix, bucket.len());
        self.tree.set(prefix, &bucket.dump())
    }

    /// Replaces the value of `key` only if it is present.
    ///
    /// # Errors
    /// Fails on I/O error or a damaged bucket.
    pub fn update_key(&mut self, key: &K, value: Vec<u8>) -> Result<bool> {
        let (prefix, bucket) = self.find_bucket(key, false)?;
        let Some(mut bucket) = bucket.filter(|bucket| bucket.find(key).is_some()) else {
            return Ok(false);
        };
        bucket.add(key.clone(), value, None)?;
        self.tree.set(prefix, &bucket.dump())?;
        Ok(true)
    }

    /// Removes `key`; the bucket goes away with its last key.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    pub fn remove_key(&mut self, key: &K) -> Result<()> {
        let (prefix, bucket) = self.find_bucket(key, false)?;
        let mut bucket = bucket
            .ok_or_else(|| Error::key_missing(format!("no bucket for key {:?}", key)))?;
        bucket.remove(key)?;
        if bucket.is_empty() {
            debug!("bucket {:?} emptied, removing it", prefix);
            self.tree.remove_key(&prefix)
        } else {
            self.tree.set(prefix, &bucket.dump())
        }
    }

    /// Returns the smallest key of the first bucket.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the first bucket cannot be loaded.
    pub fn first_key(&mut self) -> Result<Option<K>> {
        let Some(prefix) = self.tree.first_key()? else {
            return Ok(None);
        };
        let bucket = self
            .find_bucket(&prefix, true)?
            .1
            .ok_or_else(|| Error::structure("inner tree returned a missing first key"))?;
        Ok(bucket.first_key().cloned())
    }

    /// Returns the next key in the bucket of `after`, or the first key of the next bucket.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if an empty bucket is found.
    pub fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        let (prefix, bucket) = self.find_bucket(after, false)?;
        if let Some(next) = bucket.as_ref().and_then(|bucket| bucket.next_key(after)) {
            return Ok(Some(next.clone()));
        }
        let Some(next_prefix) = self.tree.next_key(&prefix)? else {
            return Ok(None);
        };
        let raw = self.tree.get(&next_prefix)?;
        Ok(self.load_bucket(&raw)?.first_key().cloned())
    }

    /// Checks if `key` is present.
    ///
    /// # Errors
    /// Fails on I/O error or a damaged bucket.
    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        let (_, bucket) = self.find_bucket(key, false)?;
        Ok(bucket.map_or(false, |bucket| bucket.find(key).is_some()))
    }

    /// Commits the inner tree.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn commit(&mut self) -> Result<()> {
        self.tree.commit()
    }

    /// Aborts the inner tree.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn abort(&mut self) -> Result<()> {
        self.tree.abort()
    }

    /// Recovers the inner tree.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] on anomalies that are not corrected.
    pub fn recover(&mut self, correct_errors: bool) -> Result<()> {
        self.tree.recover(correct_errors)
    }

    /// Bounds the number of inner tree nodes kept in memory.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `limit` is below 5.
    pub fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        self.tree.set_footprint_limit(limit)
    }

    /// Flushes both streams without committing.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn shutdown(&mut self) -> Result<()> {
        self.tree.shutdown()
    }

    /// Unwraps the tree and value streams without committing.
    pub fn into_streams(self) -> (S, S) {
        self.tree.into_streams()
    }

    /// Finds the bucket for `key`; `key_is_prefix` skips the prefix mapping.
    fn find_bucket(&mut self, key: &K, key_is_prefix: bool) -> Result<(K, Option<XBucket<K>>)> {
        let prefix = if key_is_prefix {
            key.clone()
        } else {
            (self.prefix_for)(key, self.prefix_length)?
        };
        let bucket = match self.tree.try_get(&prefix)? {
            Some(raw) => Some(self.load_bucket(&raw)?),
            None => None,
        };
        Ok((prefix, bucket))
    }

    fn load_bucket(&self, raw: &[u8]) -> Result<XBucket<K>> {
        let mut bucket = XBucket::new(self.compare);
        bucket.load(raw)?;
        if bucket.is_empty() {
            return Err(Error::structure("empty bucket loaded").into());
        }
        Ok(bucket)
    }
}

impl<K: Key, S: Stream> TreeIndex<K, Vec<u8>> for XBplusTreeBytes<K, S> {
    fn get(&mut self, key: &K) -> Result<Vec<u8>> {
        XBplusTreeBytes::get(self, key)
    }

    fn set(&mut self, key: K, value: Vec<u8>) -> Result<()> {
        XBplusTreeBytes::set(self, key, value)
    }

    fn remove_key(&mut self, key: &K) -> Result<()> {
        XBplusTreeBytes::remove_key(self, key)
    }

    fn first_key(&mut self) -> Result<Option<K>> {
        XBplusTreeBytes::first_key(self)
    }

    fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        XBplusTreeBytes::next_key(self, after)
    }

    fn contains_key(&mut self, key: &K) -> Result<bool> {
        XBplusTreeBytes::contains_key(self, key)
    }

    fn update_key(&mut self, key: &K, value: Vec<u8>) -> Result<bool> {
        XBplusTreeBytes::update_key(self, key, value)
    }

    fn commit(&mut self) -> Result<()> {
        XBplusTreeBytes::commit(self)
    }

    fn abort(&mut self) -> Result<()> {
        XBplusTreeBytes::abort(self)
    }

    fn recover(&mut self, correct_errors: bool) -> Result<()> {
        XBplusTreeBytes::recover(self, correct_errors)
    }

    fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        XBplusTreeBytes::set_footprint_limit(self, limit)
    }

    fn shutdown(&mut self) -> Result<()> {
        XBplusTreeBytes::shutdown(self)
    }
}
