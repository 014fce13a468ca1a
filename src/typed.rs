use crate::index::TreeIndex;
use crate::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

/// Conversion between typed values and the bytes a byte tree stores.
pub trait ValueConverter<V> {
    /// Encodes a value.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the value cannot be encoded.
    fn to_bytes(value: &V) -> Result<Vec<u8>>;

    /// Decodes a value.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the bytes do not hold a value.
    fn from_bytes(bytes: &[u8]) -> Result<V>;
}

/// Stores `String` values as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Values;

impl ValueConverter<String> for Utf8Values {
    fn to_bytes(value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::structure(format!("stored value is not utf-8: {}", e)).into())
    }
}

/// Stores any serde value in bincode encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeValues;

impl<V: Serialize + DeserializeOwned> ValueConverter<V> for BincodeValues {
    fn to_bytes(value: &V) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| Error::bad_key_value(format!("value cannot be encoded: {}", e)).into())
    }

    fn from_bytes(bytes: &[u8]) -> Result<V> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::structure(format!("stored value cannot be decoded: {}", e)).into())
    }
}

/// Typed view of a byte tree: values pass through the converter `C`.
///
/// ```no_run
/// use bsharptree::{BincodeValues, BplusTree, Builder, TreeIndex};
/// use std::io::Cursor;
///
/// # fn main() -> anyhow::Result<()> {
/// let bytes = Builder::<String>::new()
///     .key_length(16)
///     .create_bytes(Cursor::new(Vec::new()), Cursor::new(Vec::new()))?;
/// let mut tree = BplusTree::<_, (u32, String), BincodeValues>::new(bytes);
/// tree.set("point".to_string(), (7, "seven".to_string()))?;
/// assert_eq!(tree.get(&"point".to_string())?.0, 7);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BplusTree<T, V, C> {
    tree: T,
    marker: PhantomData<(V, C)>,
}

impl<T, V, C> BplusTree<T, V, C> {
    /// Wraps a byte tree.
    pub fn new(tree: T) -> Self {
        Self {
            tree,
            marker: PhantomData,
        }
    }

    /// Returns the wrapped byte tree.
    pub fn inner(&mut self) -> &mut T {
        &mut self.tree
    }

    /// Unwraps the byte tree.
    pub fn into_inner(self) -> T {
        self.tree
    }
}

impl<K, V, T, C> TreeIndex<K, V> for BplusTree<T, V, C>
where
    T: TreeIndex<K, Vec<u8>>,
    C: ValueConverter<V>,
{
    fn get(&mut self, key: &K) -> Result<V> {
        C::from_bytes(&self.tree.get(key)?)
    }

    fn set(&mut self, key: K, value: V) -> Result<()> {
        self.tree.set(key, C::to_bytes(&value)?)
    }

    fn remove_key(&mut self, key: &K) -> Result<()> {
        self.tree.remove_key(key)
    }

    fn first_key(&mut self) -> Result<Option<K>> {
        self.tree.first_key()
    }

    fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        self.tree.next_key(after)
    }

    fn contains_key(&mut self, key: &K) -> Result<bool> {
        self.tree.contains_key(key)
    }

    fn update_key(&mut self, key: &K, value: V) -> Result<bool> {
        self.tree.update_key(key, C::to_bytes(&value)?)
    }

    fn commit(&mut self) -> Result<()> {
        self.tree.commit()
    }

    fn abort(&mut self) -> Result<()> {
        self.tree.abort()
    }

    fn recover(&mut self, correct_errors: bool) -> Result<()> {
        self.tree.recover(correct_errors)
    }

    fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        self.tree.set_footprint_limit(limit)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.tree.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_tree::BplusTreeBytes;
    use crate::xtree::XBplusTreeBytes;
    use std::io::Cursor;

    fn compare(a: &String, b: &String) -> Ordering {
        a.cmp(b)
    }

    fn bytes_tree() -> BplusTreeBytes<String, Cursor<Vec<u8>>> {
        BplusTreeBytes::initialize(
            Cursor::new(Vec::new()),
            Cursor::new(Vec::new()),
            16,
            127,
            4,
            64,
            compare,
        )
        .unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u64,
        tags: Vec<String>,
    }

    #[test]
    fn string_values() {
        let mut tree = BplusTree::<_, String, Utf8Values>::new(bytes_tree());
        tree.set("greeting".to_string(), "hello".to_string()).unwrap();
        assert_eq!(tree.get(&"greeting".to_string()).unwrap(), "hello");
        assert!(tree
            .update_key(&"greeting".to_string(), "hi".to_string())
            .unwrap());
        tree.commit().unwrap();
        assert_eq!(tree.get(&"greeting".to_string()).unwrap(), "hi");
    }

    #[test]
    fn invalid_utf8_is_structural() {
        let mut tree = BplusTree::<_, String, Utf8Values>::new(bytes_tree());
        tree.inner().set("raw".to_string(), &[0xff, 0xfe]).unwrap();
        let err = tree.get(&"raw".to_string()).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    }

    #[test]
    fn serde_values_over_unbounded_keys() {
        let inner = XBplusTreeBytes::new(bytes_tree(), 4, compare).unwrap();
        let mut tree = BplusTree::<_, Record, BincodeValues>::new(inner);
        let record = Record {
            id: 42,
            tags: vec!["a".to_string(), "b".to_string()],
        };
        let key = "a rather long key that does not fit".to_string();
        tree.set(key.clone(), record).unwrap();
        tree.commit().unwrap();
        assert_eq!(tree.get(&key).unwrap().id, 42);
        assert_eq!(tree.first_key().unwrap(), Some(key.clone()));
        tree.remove_key(&key).unwrap();
        assert!(!tree.contains_key(&key).unwrap());
    }
}
