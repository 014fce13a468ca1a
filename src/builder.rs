use crate::bytes_tree::{BplusTreeBytes, DEFAULT_BUFFER_SIZE, DEFAULT_NODE_SIZE};
use crate::io::{self, FileStream};
use crate::prelude::*;
use crate::tree::{BplusTreeLong, DEFAULT_FOOTPRINT_LIMIT};
use crate::xtree::{HBplusTreeBytes, XBplusTreeBytes};

const DEFAULT_CULTURE_ID: i32 = 127;

/// Parameters collected by a [`Builder`].
#[derive(Clone)]
pub struct Config<K> {
    key_length: Option<usize>,
    node_size: usize,
    buffer_size: usize,
    culture_id: i32,
    footprint_limit: usize,
    bucket_size_limit: Option<usize>,
    compare: Comparator<K>,
}

impl<K> Debug for Config<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Config")
            .field("key_length", &self.key_length)
            .field("node_size", &self.node_size)
            .field("buffer_size", &self.buffer_size)
            .field("culture_id", &self.culture_id)
            .field("footprint_limit", &self.footprint_limit)
            .field("bucket_size_limit", &self.bucket_size_limit)
            .finish()
    }
}

impl<K> Config<K> {
    fn new(compare: Comparator<K>) -> Self {
        Self {
            key_length: None,
            node_size: DEFAULT_NODE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            culture_id: DEFAULT_CULTURE_ID,
            footprint_limit: DEFAULT_FOOTPRINT_LIMIT,
            bucket_size_limit: None,
            compare,
        }
    }

    /// Maximum key length, or prefix length for bucketed trees.
    pub fn key_length(&self) -> Option<usize> {
        self.key_length
    }

    /// Number of keys per node.
    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Buffer size of the value file.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Culture id written to new tree headers.
    pub fn culture_id(&self) -> i32 {
        self.culture_id
    }

    /// Number of childless nodes kept in memory.
    pub fn footprint_limit(&self) -> usize {
        self.footprint_limit
    }

    /// Maximum number of keys per bucket.
    pub fn bucket_size_limit(&self) -> Option<usize> {
        self.bucket_size_limit
    }

    fn checked_key_length(&self) -> Result<usize> {
        self.key_length.ok_or_else(|| {
            error!("key length is not set");
            Error::config("key length is not set").into()
        })
    }
}

/// `Builder` used for creating and opening trees.
///
/// Invalid values passed to setters are logged and ignored; missing or out of range
/// parameters are reported by the `create_*` and `open_*` methods.
///
/// # Examples
/// ```no_run
/// use bsharptree::Builder;
///
/// # fn main() -> anyhow::Result<()> {
/// let tree = Builder::<String>::new()
///     .key_length(64)
///     .footprint_limit(500)
///     .create_bytes_files("/tmp/index.tree", "/tmp/index.blocks")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Builder<K> {
    config: Config<K>,
}

impl<K: Key + Ord> Default for Builder<K> {
    fn default() -> Self {
        Self::with_comparator(K::cmp)
    }
}

impl<K: Key + Ord> Builder<K> {
    /// Initializes the `Builder` with defaults, ordering keys by [`Ord`].
    pub fn new() -> Self {
        Default::default()
    }
}

impl<K: Key> Builder<K> {
    /// Initializes the `Builder` with defaults and a custom key order.
    pub fn with_comparator(compare: Comparator<K>) -> Self {
        Self {
            config: Config::new(compare),
        }
    }

    /// Collected parameters.
    pub fn config(&self) -> &Config<K> {
        &self.config
    }

    /// Sets the maximum key length in bytes.
    /// For bucketed trees this is the prefix length the buckets are indexed by.
    pub fn key_length(mut self, key_length: usize) -> Self {
        if key_length > 0 {
            self.config.key_length = Some(key_length);
            info!("key length set to: {}", key_length);
        } else {
            error!("zero key length is useless, not set");
        }
        self
    }

    /// Sets the number of keys per node.
    pub fn node_size(mut self, node_size: usize) -> Self {
        if node_size > 0 {
            self.config.node_size = node_size;
            info!("node size set to: {}", node_size);
        } else {
            error!("zero node size is useless, not set");
        }
        self
    }

    /// Sets the buffer size of the value file.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        if buffer_size > 0 {
            self.config.buffer_size = buffer_size;
            info!("value buffer size set to: {}", buffer_size);
        } else {
            error!("zero buffer size is useless, not set");
        }
        self
    }

    /// Sets the culture id recorded in new tree headers.
    pub fn culture_id(mut self, culture_id: i32) -> Self {
        self.config.culture_id = culture_id;
        info!("culture id set to: {}", culture_id);
        self
    }

    /// Sets the number of childless nodes kept in memory between operations.
    pub fn footprint_limit(mut self, footprint_limit: usize) -> Self {
        if footprint_limit > 0 {
            self.config.footprint_limit = footprint_limit;
            info!("footprint limit set to: {}", footprint_limit);
        } else {
            error!("zero footprint limit is useless, not set");
        }
        self
    }

    /// Sets the maximum number of keys in one bucket of a bucketed tree.
    pub fn bucket_size_limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.config.bucket_size_limit = Some(limit);
            info!("bucket size limit set to: {}", limit);
        } else {
            error!("zero bucket size limit is useless, not set");
        }
        self
    }

    /// Replaces the key order.
    pub fn comparator(mut self, compare: Comparator<K>) -> Self {
        self.config.compare = compare;
        self
    }

    /// Creates an empty [`BplusTreeLong`] in `stream`.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if the key length is not set or a parameter is out
    /// of range.
    pub fn create_long<S: Stream>(&self, stream: S) -> Result<BplusTreeLong<K, S>> {
        let mut tree = BplusTreeLong::initialize_in_stream(
            stream,
            0,
            self.config.checked_key_length()?,
            self.config.node_size,
            self.config.culture_id,
            self.config.compare,
        )?;
        tree.set_footprint_limit(self.config.footprint_limit)?;
        Ok(tree)
    }

    /// Opens the [`BplusTreeLong`] in `stream`.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the stream holds no valid tree.
    pub fn open_long<S: Stream>(&self, stream: S) -> Result<BplusTreeLong<K, S>> {
        let mut tree = BplusTreeLong::setup_from_existing_stream(stream, 0, self.config.compare)?;
        tree.set_footprint_limit(self.config.footprint_limit)?;
        Ok(tree)
    }

    /// Creates an empty [`BplusTreeBytes`] over a tree stream and a value stream.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if the key length is not set or a parameter is out
    /// of range.
    pub fn create_bytes<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<BplusTreeBytes<K, S>> {
        let mut tree = BplusTreeBytes::initialize(
            tree_stream,
            block_stream,
            self.config.checked_key_length()?,
            self.config.culture_id,
            self.config.node_size,
            self.config.buffer_size,
            self.config.compare,
        )?;
        tree.set_footprint_limit(self.config.footprint_limit)?;
        Ok(tree)
    }

    /// Opens the [`BplusTreeBytes`] in the two streams.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if either stream holds no valid header.
    pub fn open_bytes<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<BplusTreeBytes<K, S>> {
        let mut tree = BplusTreeBytes::reopen(tree_stream, block_stream, self.config.compare)?;
        tree.set_footprint_limit(self.config.footprint_limit)?;
        Ok(tree)
    }

    /// Creates an empty [`XBplusTreeBytes`], bucketed by `key_length` byte prefixes.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if the key length is not set or a parameter is out
    /// of range.
    pub fn create_xtree<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<XBplusTreeBytes<K, S>> {
        let tree = self.create_bytes(tree_stream, block_stream)?;
        let prefix_length = self.config.checked_key_length()?;
        let mut tree = XBplusTreeBytes::new(tree, prefix_length, self.config.compare)?;
        tree.limit_bucket_size(self.config.bucket_size_limit);
        Ok(tree)
    }

    /// Opens the [`XBplusTreeBytes`] in the two streams.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if either stream holds no valid header.
    pub fn open_xtree<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<XBplusTreeBytes<K, S>> {
        let tree = self.open_bytes(tree_stream, block_stream)?;
        let prefix_length = tree.max_key_length();
        let mut tree = XBplusTreeBytes::new(tree, prefix_length, self.config.compare)?;
        tree.limit_bucket_size(self.config.bucket_size_limit);
        Ok(tree)
    }

    /// Creates an empty [`HBplusTreeBytes`], bucketed by `key_length` byte digests.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if the key length is not set or a parameter is out
    /// of range.
    pub fn create_htree<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<HBplusTreeBytes<K, S>> {
        let tree = self.create_bytes(tree_stream, block_stream)?;
        let prefix_length = self.config.checked_key_length()?;
        let mut tree = HBplusTreeBytes::new(tree, prefix_length, self.config.compare)?;
        tree.limit_bucket_size(self.config.bucket_size_limit);
        Ok(tree)
    }

    /// Opens the [`HBplusTreeBytes`] in the two streams.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if either stream holds no valid header.
    pub fn open_htree<S: Stream>(
        &self,
        tree_stream: S,
        block_stream: S,
    ) -> Result<HBplusTreeBytes<K, S>> {
        let tree = self.open_bytes(tree_stream, block_stream)?;
        let prefix_length = tree.max_key_length();
        let mut tree = HBplusTreeBytes::new(tree, prefix_length, self.config.compare)?;
        tree.limit_bucket_size(self.config.bucket_size_limit);
        Ok(tree)
    }

    /// Creates a [`BplusTreeLong`] in a new locked file.
    ///
    /// # Errors
    /// Fails if the file exists or is locked, or on a bad parameter.
    pub fn create_long_file(&self, path: impl AsRef<Path>) -> Result<BplusTreeLong<K, FileStream>> {
        let path = path.as_ref();
        let tree = self.create_long(io::create(path)?)?;
        info!("tree created in {}", path.display());
        Ok(tree)
    }

    /// Opens a [`BplusTreeLong`] file, shared-locked if `read_only`.
    ///
    /// # Errors
    /// Fails if the file is missing or locked, or holds no valid tree.
    pub fn open_long_file(
        &self,
        path: impl AsRef<Path>,
        read_only: bool,
    ) -> Result<BplusTreeLong<K, FileStream>> {
        let path = path.as_ref();
        let tree = self.open_long(io::open(path, read_only)?)?;
        info!("tree opened from {}", path.display());
        Ok(tree)
    }

    /// Creates a [`BplusTreeBytes`] in two new locked files.
    ///
    /// # Errors
    /// Fails if either file exists or is locked, or on a bad parameter.
    pub fn create_bytes_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
    ) -> Result<BplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) = Self::create_pair(tree_path.as_ref(), block_path.as_ref())?;
        self.create_bytes(tree_stream, block_stream)
    }

    /// Opens a [`BplusTreeBytes`] from its two files.
    ///
    /// # Errors
    /// Fails if either file is missing or locked, or holds no valid header.
    pub fn open_bytes_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
        read_only: bool,
    ) -> Result<BplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) =
            Self::open_pair(tree_path.as_ref(), block_path.as_ref(), read_only)?;
        self.open_bytes(tree_stream, block_stream)
    }

    /// Creates an [`XBplusTreeBytes`] in two new locked files.
    ///
    /// # Errors
    /// Fails if either file exists or is locked, or on a bad parameter.
    pub fn create_xtree_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
    ) -> Result<XBplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) = Self::create_pair(tree_path.as_ref(), block_path.as_ref())?;
        self.create_xtree(tree_stream, block_stream)
    }

    /// Opens an [`XBplusTreeBytes`] from its two files.
    ///
    /// # Errors
    /// Fails if either file is missing or locked, or holds no valid header.
    pub fn open_xtree_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
        read_only: bool,
    ) -> Result<XBplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) =
            Self::open_pair(tree_path.as_ref(), block_path.as_ref(), read_only)?;
        self.open_xtree(tree_stream, block_stream)
    }

    /// Creates an [`HBplusTreeBytes`] in two new locked files.
    ///
    /// # Errors
    /// Fails if either file exists or is locked, or on a bad parameter.
    pub fn create_htree_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
    ) -> Result<HBplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) = Self::create_pair(tree_path.as_ref(), block_path.as_ref())?;
        self.create_htree(tree_stream, block_stream)
    }

    /// Opens an [`HBplusTreeBytes`] from its two files.
    ///
    /// # Errors
    /// Fails if either file is missing or locked, or holds no valid header.
    pub fn open_htree_files(
        &self,
        tree_path: impl AsRef<Path>,
        block_path: impl AsRef<Path>,
        read_only: bool,
    ) -> Result<HBplusTreeBytes<K, FileStream>> {
        let (tree_stream, block_stream) =
            Self::open_pair(tree_path.as_ref(), block_path.as_ref(), read_only)?;
        self.open_htree(tree_stream, block_stream)
    }

    fn create_pair(tree_path: &Path, block_path: &Path) -> Result<(FileStream, FileStream)> {
        let tree_stream = io::create(tree_path)?;
        let block_stream = io::create(block_path)?;
        info!(
            "tree files created: {}, {}",
            tree_path.display(),
            block_path.display()
        );
        Ok((tree_stream, block_stream))
    }

    fn open_pair(
        tree_path: &Path,
        block_path: &Path,
        read_only: bool,
    ) -> Result<(FileStream, FileStream)> {
        let tree_stream = io::open(tree_path, read_only)?;
        let block_stream = io::open(block_path, read_only)?;
        info!(
            "tree files opened: {}, {} (read only: {})",
            tree_path.display(),
            block_path.display(),
            read_only
        );
        Ok((tree_stream, block_stream))
    }
}
