use super::prelude::*;
use sha2::{Digest, Sha256};

/// Byte tree for keys of any length, bucketed by a digest of the whole key.
///
/// Unlike [`XBplusTreeBytes`], keys with a long common head spread evenly over buckets.
/// The price is iteration order: buckets are visited in digest order, keys inside a
/// bucket in comparator order.
pub struct HBplusTreeBytes<K, S> {
    inner: XBplusTreeBytes<K, S>,
}

impl<K, S> Debug for HBplusTreeBytes<K, S>
where
    XBplusTreeBytes<K, S>: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HBplusTreeBytes")
            .field("inner", &self.inner)
            .finish()
    }
}

/// SHA-256 of the key, cycled to `prefix_length` bytes and mapped onto printable ASCII.
pub(crate) fn digest_prefix<K: Key>(key: &K, prefix_length: usize) -> Result<K> {
    let digest = Sha256::digest(key.to_bytes());
    let printable: Vec<u8> = digest
        .iter()
        .cycle()
        .take(prefix_length)
        .map(|&byte| {
            let folded = if byte > 127 { 256 - u16::from(byte) } else { u16::from(byte) };
            (folded % 79 + 40) as u8
        })
        .collect();
    K::from_bytes(&printable)
}

impl<K: Key, S: Stream> HBplusTreeBytes<K, S> {
    /// Wraps `tree`, indexing keys by a `prefix_length` byte digest.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `prefix_length` is below 3 or longer than the
    /// keys of `tree`.
    pub fn new(tree: BplusTreeBytes<K, S>, prefix_length: usize, compare: Comparator<K>) -> Result<Self> {
        let inner = XBplusTreeBytes::with_prefix(tree, prefix_length, compare, digest_prefix)?;
        Ok(Self { inner })
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

    /// Limits the number of keys sharing a digest; `None` lifts the limit.
    pub fn limit_bucket_size(&mut self, limit: Option<usize>) {
        self.inner.limit_bucket_size(limit);
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    /// Fails on I/O error or a damaged bucket.
    pub fn try_get(&mut self, key: &K) -> Result<Option<Vec<u8>>> {
        self.inner.try_get(key)
    }

    /// Unwraps the tree and value streams without committing.
    pub fn into_streams(self) -> (S, S) {
        self.inner.into_streams()
    }
}

impl<K: Key, S: Stream> TreeIndex<K, Vec<u8>> for HBplusTreeBytes<K, S> {
    fn get(&mut self, key: &K) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: K, value: Vec<u8>) -> Result<()> {
        self.inner.set(key, value)
    }

    fn remove_key(&mut self, key: &K) -> Result<()> {
        self.inner.remove_key(key)
    }

    fn first_key(&mut self) -> Result<Option<K>> {
        self.inner.first_key()
    }

    fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        self.inner.next_key(after)
    }

    fn contains_key(&mut self, key: &K) -> Result<bool> {
        self.inner.contains_key(key)
    }

    fn update_key(&mut self, key: &K, value: Vec<u8>) -> Result<bool> {
        self.inner.update_key(key, value)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn abort(&mut self) -> Result<()> {
        self.inner.abort()
    }

    fn recover(&mut self, correct_errors: bool) -> Result<()> {
        self.inner.recover(correct_errors)
    }

    fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        self.inner.set_footprint_limit(limit)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown()
    }
}
