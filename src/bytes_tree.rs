use crate::index::TreeIndex;
use crate::linked_file::LinkedFile;
use crate::prelude::*;
use crate::tree::BplusTreeLong;

/// Default payload size of value buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Default number of keys per node.
pub const DEFAULT_NODE_SIZE: usize = 32;

/// B+tree mapping keys to byte values.
///
/// The tree maps each key to the id of a chunk in a [`LinkedFile`] holding the value.
/// Replaced and removed chunks stay readable until the next commit, chunks written since
/// the last commit are released again on abort.
#[derive(Debug)]
pub struct BplusTreeBytes<K, S> {
    tree: BplusTreeLong<K, S>,
    chunks: LinkedFile<S>,
    free_on_abort: HashSet<u64>,
    free_on_commit: HashSet<u64>,
}

impl<K: Key, S: Stream> BplusTreeBytes<K, S> {
    /// Combines a tree and a chunk store into a byte tree.
    pub fn new(tree: BplusTreeLong<K, S>, chunks: LinkedFile<S>) -> Self {
        Self {
            tree,
            chunks,
            free_on_abort: HashSet::new(),
            free_on_commit: HashSet::new(),
        }
    }

    /// Creates an empty byte tree, the tree in `tree_stream` and values in `block_stream`.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] on out of range parameters.
    pub fn initialize(
        tree_stream: S,
        block_stream: S,
        max_key_length: usize,
        culture_id: i32,
        node_size: usize,
        buffer_size: usize,
        compare: Comparator<K>,
    ) -> Result<Self> {
        let tree = BplusTreeLong::initialize_in_stream(
            tree_stream,
            0,
            max_key_length,
            node_size,
            culture_id,
            compare,
        )?;
        let chunks = LinkedFile::initialize_in_stream(block_stream, buffer_size, 0)?;
        Ok(Self::new(tree, chunks))
    }

    /// Opens a byte tree written by [`BplusTreeBytes::initialize`].
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if either stream holds no valid header.
    pub fn reopen(tree_stream: S, block_stream: S, compare: Comparator<K>) -> Result<Self> {
        let tree = BplusTreeLong::setup_from_existing_stream(tree_stream, 0, compare)?;
        let chunks = LinkedFile::setup_from_existing_stream(block_stream, 0)?;
        Ok(Self::new(tree, chunks))
    }

    /// Longest key encoding the tree accepts.
    pub fn max_key_length(&self) -> usize {
        self.tree.max_key_length()
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn try_get(&mut self, key: &K) -> Result<Option<Vec<u8>>> {
        match self.tree.try_get(key)? {
            Some(chunk) => Ok(Some(self.chunks.get_chunk(chunk)?)),
            None => Ok(None),
        }
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
    /// Fails with [`Kind::BadKeyValue`] if the key is too long; nothing is written then.
    pub fn set(&mut self, key: K, value: &[u8]) -> Result<()> {
        self.tree.check_key(&key)?;
        let chunk = self.chunks.store_new_chunk(value)?;
        self.free_on_abort.insert(chunk);
        if let Some(previous) = self.tree.try_get(&key)? {
            self.release_chunk(previous)?;
        }
        self.tree.set(key, chunk)
    }

    /// Replaces the value of `key` only if it is present.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn update_key(&mut self, key: &K, value: &[u8]) -> Result<bool> {
        let Some(previous) = self.tree.try_get(key)? else {
            return Ok(false);
        };
        let chunk = self.chunks.store_new_chunk(value)?;
        self.free_on_abort.insert(chunk);
        self.release_chunk(previous)?;
        self.tree.update_key(key, chunk)
    }

    /// Removes `key` and its value.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    pub fn remove_key(&mut self, key: &K) -> Result<()> {
        let chunk = self.tree.get(key)?;
        self.release_chunk(chunk)?;
        self.tree.remove_key(key)
    }

    /// Returns the smallest key.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn first_key(&mut self) -> Result<Option<K>> {
        self.tree.first_key()
    }

    /// Returns the smallest key greater than `after`.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        self.tree.next_key(after)
    }

    /// Checks if `key` is present.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        self.tree.contains_key(key)
    }

    /// Makes every change since the last commit durable, then releases replaced values.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn commit(&mut self) -> Result<()> {
        self.chunks.flush()?;
        self.tree.commit()?;
        let released = self.free_on_commit.len();
        let mut replaced: Vec<_> = self.free_on_commit.drain().collect();
        replaced.sort_unstable_by(|a, b| b.cmp(a));
        for chunk in replaced {
            self.chunks.release_buffers(chunk)?;
        }
        self.chunks.flush()?;
        self.free_on_abort.clear();
        debug!("byte tree committed, {} values released", released);
        Ok(())
    }

    /// Drops every change since the last commit.
    ///
    /// # Errors
    /// Fails on I/O error or damaged structure.
    pub fn abort(&mut self) -> Result<()> {
        let mut written: Vec<_> = self.free_on_abort.drain().collect();
        written.sort_unstable_by(|a, b| b.cmp(a));
        for chunk in written {
            self.chunks.release_buffers(chunk)?;
        }
        self.tree.abort()?;
        self.chunks.flush()?;
        self.free_on_commit.clear();
        debug!("byte tree aborted");
        Ok(())
    }

    /// Checks both files; with `correct_errors` leaked tree buffers and value chunks are
    /// reclaimed.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] on anomalies that are not corrected, or if two keys
    /// share a value chunk.
    pub fn recover(&mut self, correct_errors: bool) -> Result<()> {
        self.tree.recover(correct_errors)?;
        let mut in_use: HashMap<u64, Option<K>> = HashMap::new();
        let mut current = self.tree.first_key()?;
        while let Some(key) = current {
            let chunk = self.tree.get(&key)?;
            if let Some(owner) = in_use.get(&chunk) {
                let cause = format!(
                    "value chunk {} shared by keys {:?} and {:?}",
                    chunk, owner, key
                );
                return Err(Error::structure(cause).into());
            }
            current = self.tree.next_key(&key)?;
            in_use.insert(chunk, Some(key));
        }
        for chunk in &self.free_on_commit {
            in_use.insert(*chunk, None);
        }
        self.chunks.recover(&in_use, correct_errors)?;
        self.chunks.flush()
    }

    /// Bounds the number of tree nodes kept in memory.
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
        self.tree.shutdown()?;
        self.chunks.shutdown()
    }

    /// Unwraps the tree and value streams without committing.
    pub fn into_streams(self) -> (S, S) {
        (self.tree.into_inner(), self.chunks.into_inner())
    }

    fn release_chunk(&mut self, chunk: u64) -> Result<()> {
        if self.free_on_abort.remove(&chunk) {
            self.chunks.release_buffers(chunk)
        } else {
            self.free_on_commit.insert(chunk);
            Ok(())
        }
    }
}

impl<K: Key, S: Stream> TreeIndex<K, Vec<u8>> for BplusTreeBytes<K, S> {
    fn get(&mut self, key: &K) -> Result<Vec<u8>> {
        BplusTreeBytes::get(self, key)
    }

    fn set(&mut self, key: K, value: Vec<u8>) -> Result<()> {
        BplusTreeBytes::set(self, key, &value)
    }

    fn remove_key(&mut self, key: &K) -> Result<()> {
        BplusTreeBytes::remove_key(self, key)
    }

    fn first_key(&mut self) -> Result<Option<K>> {
        BplusTreeBytes::first_key(self)
    }

    fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        BplusTreeBytes::next_key(self, after)
    }

    fn contains_key(&mut self, key: &K) -> Result<bool> {
        BplusTreeBytes::contains_key(self, key)
    }

    fn update_key(&mut self, key: &K, value: Vec<u8>) -> Result<bool> {
        BplusTreeBytes::update_key(self, key, &value)
    }

    fn commit(&mut self) -> Result<()> {
        BplusTreeBytes::commit(self)
    }

    fn abort(&mut self) -> Result<()> {
        BplusTreeBytes::abort(self)
    }

    fn recover(&mut self, correct_errors: bool) -> Result<()> {
        BplusTreeBytes::recover(self, correct_errors)
    }

    fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        BplusTreeBytes::set_footprint_limit(self, limit)
    }

    fn shutdown(&mut self) -> Result<()> {
        BplusTreeBytes::shutdown(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    type TestTree = BplusTreeBytes<String, Cursor<Vec<u8>>>;

    fn compare(a: &String, b: &String) -> Ordering {
        a.cmp(b)
    }

    fn new_tree() -> TestTree {
        BplusTreeBytes::initialize(
            Cursor::new(Vec::new()),
            Cursor::new(Vec::new()),
            12,
            127,
            4,
            32,
            compare,
        )
        .unwrap()
    }

    fn reopen(tree: TestTree) -> TestTree {
        let (tree_stream, block_stream) = tree.into_streams();
        BplusTreeBytes::reopen(tree_stream, block_stream, compare).unwrap()
    }

    fn value(seed: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i + seed) % 256) as u8).collect()
    }

    #[test]
    fn values_survive_reopen() {
        let mut tree = new_tree();
        for i in 0..50 {
            tree.set(format!("key{}", i), &value(i, i * 13)).unwrap();
        }
        tree.commit().unwrap();
        let mut tree = reopen(tree);
        for i in 0..50 {
            assert_eq!(tree.get(&format!("key{}", i)).unwrap(), value(i, i * 13));
        }
        tree.recover(false).unwrap();
    }

    #[test]
    fn replaced_values_are_released_on_commit() {
        let mut tree = new_tree();
        tree.set("a".to_string(), &value(1, 100)).unwrap();
        tree.commit().unwrap();
        tree.set("a".to_string(), &value(2, 100)).unwrap();
        assert_eq!(tree.free_on_commit.len(), 1);
        // the uncommitted value is released at once when replaced again
        tree.set("a".to_string(), &value(3, 100)).unwrap();
        assert_eq!(tree.free_on_abort.len(), 1);
        tree.commit().unwrap();
        assert!(tree.free_on_commit.is_empty());
        assert_eq!(tree.get(&"a".to_string()).unwrap(), value(3, 100));
        tree.recover(false).unwrap();
    }

    #[test]
    fn abort_restores_values() {
        let mut tree = new_tree();
        tree.set("a".to_string(), b"first").unwrap();
        tree.set("b".to_string(), b"second").unwrap();
        tree.commit().unwrap();
        tree.set("a".to_string(), b"changed").unwrap();
        tree.remove_key(&"b".to_string()).unwrap();
        tree.set("c".to_string(), b"new").unwrap();
        tree.abort().unwrap();
        assert_eq!(tree.get(&"a".to_string()).unwrap(), b"first");
        assert_eq!(tree.get(&"b".to_string()).unwrap(), b"second");
        assert!(!tree.contains_key(&"c".to_string()).unwrap());
        tree.recover(false).unwrap();
    }

    #[test]
    fn update_only_touches_present_keys() {
        let mut tree = new_tree();
        tree.set("a".to_string(), b"1").unwrap();
        assert!(tree.update_key(&"a".to_string(), b"2").unwrap());
        assert!(!tree.update_key(&"b".to_string(), b"3").unwrap());
        assert_eq!(tree.get(&"a".to_string()).unwrap(), b"2");
        assert_eq!(tree.try_get(&"b".to_string()).unwrap(), None);
    }

    #[test]
    fn long_key_writes_nothing() {
        let mut tree = new_tree();
        let err = tree.set("much too long key".to_string(), b"x").unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::BadKeyValue));
        assert!(tree.free_on_abort.is_empty());
        let (_, blocks) = tree.into_streams();
        let mut chunks = LinkedFile::setup_from_existing_stream(blocks, 0).unwrap();
        chunks.check_structure::<()>(None, false).unwrap();
    }

    #[test]
    fn leaked_value_is_recovered() {
        let mut tree = new_tree();
        tree.set("kept".to_string(), &value(0, 70)).unwrap();
        tree.commit().unwrap();
        tree.set("lost".to_string(), &value(1, 70)).unwrap();
        tree.shutdown().unwrap();
        // crash before commit: the value chunk reached the file, the key did not
        let (tree_stream, mut block_stream) = tree.into_streams();
        block_stream.set_position(0);
        let mut tree = BplusTreeBytes::reopen(tree_stream, block_stream, compare).unwrap();
        assert!(!tree.contains_key(&"lost".to_string()).unwrap());
        let err = tree.recover(false).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
        tree.recover(true).unwrap();
        tree.recover(false).unwrap();
        assert_eq!(tree.get(&"kept".to_string()).unwrap(), value(0, 70));
    }

    #[test]
    fn missing_key_is_reported() {
        let mut tree = new_tree();
        assert!(Error::is_key_missing(&tree.get(&"x".to_string()).unwrap_err()));
        assert!(Error::is_key_missing(&tree.remove_key(&"x".to_string()).unwrap_err()));
    }
}
