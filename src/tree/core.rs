use super::prelude::*;
use crate::buffer_file::BufferFile;
use crate::index::TreeIndex;
use crate::io::{read_at, stream_len, write_at};

pub(crate) const DEFAULT_FOOTPRINT_LIMIT: usize = 100;
pub(crate) const MIN_FOOTPRINT_LIMIT: usize = 5;
const FREE_BUFFER_SIZE: usize = 9;

/// B+tree mapping keys of bounded length to 64-bit values.
///
/// Changes are kept in memory and written to fresh buffers; nothing committed is
/// overwritten. [`BplusTreeLong::commit`] records the new root in the header and only then
/// reclaims the buffers of the replaced nodes, [`BplusTreeLong::abort`] returns to the
/// last committed root.
///
/// At most `footprint_limit` childless nodes stay loaded; older ones are written out and
/// dropped after every operation.
pub struct BplusTreeLong<K, S> {
    pub(super) buffers: BufferFile<S>,
    seek_start: u64,
    pub(super) layout: Layout,
    culture_id: i32,
    pub(super) compare: Comparator<K>,
    pub(super) root: Option<NodeId>,
    root_seek: u64,
    free_head: u64,
    pub(super) free_on_abort: HashSet<u64>,
    pub(super) free_on_commit: HashSet<u64>,
    pub(super) nodes: Arena<K>,
    pub(super) terminals: TerminalCache,
    footprint_limit: usize,
}

impl<K, S> Debug for BplusTreeLong<K, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BplusTreeLong")
            .field("seek_start", &self.seek_start)
            .field("layout", &self.layout)
            .field("culture_id", &self.culture_id)
            .field("root_seek", &(self.root_seek as i64))
            .field("free_head", &(self.free_head as i64))
            .field("loaded_nodes", &self.nodes.len())
            .field("terminal_nodes", &self.terminals.len())
            .field("footprint_limit", &self.footprint_limit)
            .finish()
    }
}

impl<K: Key, S: Stream> BplusTreeLong<K, S> {
    /// Creates an empty tree in `stream` at `seek_start`.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `node_size < 2` or `max_key_length < 3`,
    /// with [`Kind::Structure`] if the stream already holds data past `seek_start`.
    pub fn initialize_in_stream(
        mut stream: S,
        seek_start: u64,
        max_key_length: usize,
        node_size: usize,
        culture_id: i32,
        compare: Comparator<K>,
    ) -> Result<Self> {
        let layout = Layout::new(node_size, max_key_length)?;
        let len = stream_len(&mut stream)?;
        if len > seek_start {
            let cause = format!("stream already written past {}: {} bytes", seek_start, len);
            return Err(Error::structure(cause).into());
        }
        let header = TreeHeader::new(&layout, culture_id, NULL_BUFFER, NULL_BUFFER);
        write_at(&mut stream, seek_start, &header.to_raw()?)?;
        let buffers = BufferFile::initialize_in_stream(
            stream,
            layout.buffer_size(),
            seek_start + TREE_HEADER_SIZE as u64,
        )?;
        info!(
            "tree initialized, node size: {}, max key length: {}, buffer size: {}",
            node_size,
            max_key_length,
            layout.buffer_size()
        );
        Ok(Self::new(buffers, seek_start, layout, culture_id, compare, NULL_BUFFER, NULL_BUFFER))
    }

    /// Opens the tree found in `stream` at `seek_start`.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the headers are damaged or disagree.
    pub fn setup_from_existing_stream(
        mut stream: S,
        seek_start: u64,
        compare: Comparator<K>,
    ) -> Result<Self> {
        let header = Self::read_header(&mut stream, seek_start)?;
        let layout = header.layout()?;
        let buffers =
            BufferFile::setup_from_existing_stream(stream, seek_start + TREE_HEADER_SIZE as u64)?;
        if buffers.buffer_size() != layout.buffer_size() {
            let cause = format!(
                "inner buffer size {} does not match node buffer size {}",
                buffers.buffer_size(),
                layout.buffer_size()
            );
            return Err(Error::structure(cause).into());
        }
        let mut tree = Self::new(
            buffers,
            seek_start,
            layout,
            header.culture_id,
            compare,
            header.root_seek,
            header.free_head,
        );
        tree.load_root()?;
        debug!(
            "tree opened, node size: {}, max key length: {}, root: {}",
            layout.node_size(),
            layout.max_key_length(),
            header.root_seek as i64
        );
        Ok(tree)
    }

    fn new(
        buffers: BufferFile<S>,
        seek_start: u64,
        layout: Layout,
        culture_id: i32,
        compare: Comparator<K>,
        root_seek: u64,
        free_head: u64,
    ) -> Self {
        Self {
            buffers,
            seek_start,
            layout,
            culture_id,
            compare,
            root: None,
            root_seek,
            free_head,
            free_on_abort: HashSet::new(),
            free_on_commit: HashSet::new(),
            nodes: Arena::new(),
            terminals: TerminalCache::default(),
            footprint_limit: DEFAULT_FOOTPRINT_LIMIT,
        }
    }

    /// Longest key encoding the tree accepts, in bytes.
    pub fn max_key_length(&self) -> usize {
        self.layout.max_key_length()
    }

    /// Maximum number of keys in one node.
    pub fn node_size(&self) -> usize {
        self.layout.node_size()
    }

    /// Culture id recorded at creation.
    pub fn culture_id(&self) -> i32 {
        self.culture_id
    }

    /// Rejects keys the tree cannot store.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the key encoding is too long.
    pub fn check_key(&self, key: &K) -> Result<()> {
        let len = key.to_bytes().len();
        if len > self.max_key_length() {
            let cause = format!(
                "key {:?} is {} bytes, at most {} allowed",
                key,
                len,
                self.max_key_length()
            );
            return Err(Error::bad_key_value(cause).into());
        }
        Ok(())
    }

    /// Returns the value stored for `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    pub fn get(&mut self, key: &K) -> Result<u64> {
        self.try_get(key)?
            .ok_or_else(|| Error::key_missing(format!("key not found: {:?}", key)).into())
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    /// Fails on I/O error or damaged nodes.
    pub fn try_get(&mut self, key: &K) -> Result<Option<u64>> {
        let found = self.find_match(key)?;
        self.shrink_footprint()?;
        Ok(found)
    }

    /// Checks if `key` is present.
    ///
    /// # Errors
    /// Fails on I/O error or damaged nodes.
    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        Ok(self.try_get(key)?.is_some())
    }

    /// Stores `value` for `key`, replacing any previous value.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the key is too long; the tree is unchanged then.
    pub fn set(&mut self, key: K, value: u64) -> Result<()> {
        self.check_key(&key)?;
        let mut new_root = false;
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.new_node(None, None, true);
                self.root = Some(root);
                self.terminals.forget(root);
                new_root = true;
                root
            }
        };
        if let Some((separator, right)) = self.insert(root, key, value)? {
            self.root = Some(self.binary_root(root, separator, right));
            self.check_if_terminal(root);
            new_root = true;
        }
        if new_root {
            if let Some(root) = self.root {
                self.root_seek = self.dump_to_fresh_buffer(root)?;
            }
        }
        self.shrink_footprint()
    }

    /// Replaces the value of an existing key without restructuring the tree.
    ///
    /// Returns `false` if the key is absent.
    ///
    /// # Errors
    /// Fails on I/O error or damaged nodes.
    pub fn update_key(&mut self, key: &K, value: u64) -> Result<bool> {
        let updated = self.update_match(key, value)?;
        self.shrink_footprint()?;
        Ok(updated)
    }

    /// Removes `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is absent.
    pub fn remove_key(&mut self, key: &K) -> Result<()> {
        let root = self
            .root
            .ok_or_else(|| Error::key_missing(format!("tree is empty, no key {:?}", key)))?;
        let (_, merge_root) = self.delete(root, key)?;
        let root_node = &self.nodes[root];
        if merge_root && !root_node.is_leaf && root_node.size_in_use() == 0 {
            let child = self.materialize(root, 0)?;
            self.make_root(child)?;
            self.root = Some(child);
            self.root_seek = self.nodes[child].buffer;
            self.release_node(root)?;
            debug!("root collapsed into its only child");
        }
        self.shrink_footprint()
    }

    /// Returns the smallest key, `None` for an empty tree.
    ///
    /// # Errors
    /// Fails on I/O error or damaged nodes.
    pub fn first_key(&mut self) -> Result<Option<K>> {
        let Some(mut node) = self.root else {
            return Ok(None);
        };
        while !self.nodes[node].is_leaf {
            node = self.materialize(node, 0)?;
        }
        let key = self.traverse_to_following_key(node, 0)?;
        self.shrink_footprint()?;
        Ok(key)
    }

    /// Returns the smallest key greater than `after`, `None` past the last key.
    ///
    /// # Errors
    /// Fails on I/O error or damaged nodes.
    pub fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        let key = self.find_next_key(after)?;
        self.shrink_footprint()?;
        Ok(key)
    }

    /// Makes every change since the last commit durable.
    ///
    /// Dirty nodes go to fresh buffers, the header is pointed at the new root, and only
    /// then are the replaced buffers put on the free list and the header written again.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(root) = self.root {
            self.root_seek = self.invalidate(root, false)?;
        }
        self.buffers.flush()?;
        self.set_header()?;
        self.buffers.flush()?;
        let mut replaced: Vec<_> = self.free_on_commit.drain().collect();
        replaced.sort_unstable_by(|a, b| b.cmp(a));
        for buffer in &replaced {
            self.deallocate_buffer(*buffer)?;
        }
        self.set_header()?;
        self.buffers.flush()?;
        self.reset_bookkeeping();
        debug!(
            "tree committed, root: {}, {} buffers reclaimed",
            self.root_seek as i64,
            replaced.len()
        );
        Ok(())
    }

    /// Drops every change since the last commit.
    ///
    /// # Errors
    /// Fails on I/O error or a damaged header.
    pub fn abort(&mut self) -> Result<()> {
        let mut allocated: Vec<_> = self.free_on_abort.drain().collect();
        allocated.sort_unstable_by(|a, b| b.cmp(a));
        for buffer in &allocated {
            self.deallocate_buffer(*buffer)?;
        }
        let free_head = self.free_head;
        let header = Self::read_header(self.buffers.stream_mut(), self.seek_start)?;
        self.root_seek = header.root_seek;
        self.load_root()?;
        self.reset_bookkeeping();
        self.free_head = free_head;
        self.set_header()?;
        self.buffers.flush()?;
        debug!(
            "tree aborted, root: {}, {} buffers reclaimed",
            self.root_seek as i64,
            allocated.len()
        );
        Ok(())
    }

    /// Finds buffers reachable neither from the root nor from the free list.
    ///
    /// With `correct_errors` they are put on the free list, otherwise they are reported in
    /// one error. A free list broken by buffers reused after the last commit is rebuilt
    /// from every buffer outside the tree when correcting.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] on damaged nodes, a damaged free list, or unreachable
    /// buffers when not correcting.
    pub fn recover(&mut self, correct_errors: bool) -> Result<()> {
        let mut visited = Visited::default();
        if let Some(root) = self.root {
            self.sanity_check_node(root, &mut visited)?;
        }
        let in_tree = visited.buffers.clone();
        match self.walk_free_list(&mut visited.buffers) {
            Ok(()) => {}
            Err(e) if correct_errors => {
                warn!("rebuilding tree free list: {:#}", e);
                visited.buffers = in_tree.clone();
                self.free_head = NULL_BUFFER;
            }
            Err(e) => return Err(e),
        }
        let last = self.buffers.next_buffer_number()?;
        let mut missing: Vec<u64> = (0..last)
            .filter(|buffer| !visited.buffers.contains(buffer) && !self.free_on_commit.contains(buffer))
            .collect();
        if !missing.is_empty() {
            if !correct_errors {
                let cause = format!("found {} unreachable buffers: {:?}", missing.len(), missing);
                return Err(Error::structure(cause).into());
            }
            warn!("reclaiming {} unreachable buffers", missing.len());
            missing.sort_unstable_by(|a, b| b.cmp(a));
            for buffer in missing {
                self.link_free_buffer(buffer)?;
            }
        }
        debug!("tree recovered, {} buffers in use", in_tree.len());
        self.shrink_footprint()
    }

    /// Validates configuration; `strong` also walks the whole tree.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] on the first inconsistency found.
    pub fn sanity_check(&mut self, strong: bool) -> Result<()> {
        if self.node_size() < 2 || self.max_key_length() < 3 {
            return Err(Error::structure("tree parameters out of range").into());
        }
        if !strong {
            return Ok(());
        }
        self.recover(false)?;
        let pending: Vec<u64> = self
            .free_on_abort
            .iter()
            .chain(self.free_on_commit.iter())
            .copied()
            .collect();
        for buffer in pending {
            if self.buffer_tag(buffer)? == FREE {
                let cause = format!("buffer {} is pending release but already free", buffer);
                return Err(Error::structure(cause).into());
            }
        }
        Ok(())
    }

    /// Bounds the number of loaded childless nodes; takes effect after the next operation.
    ///
    /// # Errors
    /// Fails with [`Kind::WrongConfig`] if `limit` is below 5.
    pub fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        if limit < MIN_FOOTPRINT_LIMIT {
            let cause = format!("footprint limit must be at least {}: {}", MIN_FOOTPRINT_LIMIT, limit);
            return Err(Error::config(cause).into());
        }
        self.footprint_limit = limit;
        Ok(())
    }

    /// Flushes the stream. Uncommitted changes are not written.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn shutdown(&mut self) -> Result<()> {
        self.buffers.flush()
    }

    /// Unwraps the underlying stream without committing.
    pub fn into_inner(self) -> S {
        self.buffers.into_inner()
    }

    /// Number of nodes currently loaded in memory.
    pub fn loaded_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn read_header(stream: &mut S, seek_start: u64) -> Result<TreeHeader> {
        let mut raw = [0; TREE_HEADER_SIZE];
        let read = read_at(stream, seek_start, &mut raw)?;
        if read < TREE_HEADER_SIZE {
            return Err(Error::structure("tree header is truncated").into());
        }
        TreeHeader::from_raw(&raw)
    }

    fn set_header(&mut self) -> Result<()> {
        let header = TreeHeader::new(&self.layout, self.culture_id, self.root_seek, self.free_head);
        write_at(self.buffers.stream_mut(), self.seek_start, &header.to_raw()?)?;
        Ok(())
    }

    fn load_root(&mut self) -> Result<()> {
        self.nodes.clear();
        self.terminals.clear();
        self.root = None;
        if self.root_seek != NULL_BUFFER {
            let root = self.new_node(None, None, true);
            self.root = Some(root);
            self.terminals.forget(root);
            self.load_node(root, self.root_seek)?;
        }
        Ok(())
    }

    fn reset_bookkeeping(&mut self) {
        self.free_on_abort.clear();
        self.free_on_commit.clear();
        self.terminals.clear();
    }

    pub(super) fn shrink_footprint(&mut self) -> Result<()> {
        self.invalidate_terminal_nodes(self.footprint_limit)
    }

    fn invalidate_terminal_nodes(&mut self, limit: usize) -> Result<()> {
        while self.terminals.len() > limit {
            let Some(victim) = self.terminals.pop_oldest() else {
                break;
            };
            if Some(victim) == self.root || self.nodes[victim].buffer == NULL_BUFFER {
                continue;
            }
            self.invalidate(victim, true)?;
        }
        Ok(())
    }

    fn buffer_tag(&mut self, buffer: u64) -> Result<u8> {
        let mut tag = [0; 1];
        self.buffers.get_buffer(buffer, &mut tag)?;
        Ok(tag[0])
    }

    pub(super) fn allocate_buffer(&mut self) -> Result<u64> {
        if self.free_head == NULL_BUFFER {
            let buffer = self.buffers.next_buffer_number()?;
            trace!("node buffer {} allocated past the end", buffer);
            return Ok(buffer);
        }
        let buffer = self.free_head;
        self.free_head = self.parse_free_buffer(buffer)?;
        trace!("node buffer {} allocated from free list", buffer);
        Ok(buffer)
    }

    fn parse_free_buffer(&mut self, buffer: u64) -> Result<u64> {
        let mut raw = [0; FREE_BUFFER_SIZE];
        self.buffers.get_buffer(buffer, &mut raw)?;
        let mut raw = &raw[..];
        if raw.get_u8() != FREE {
            let cause = format!("free list buffer {} not marked free", buffer);
            return Err(Error::structure(cause).into());
        }
        Ok(raw.get_u64_le())
    }

    fn walk_free_list(&mut self, seen: &mut HashSet<u64>) -> Result<()> {
        let mut free = self.free_head;
        while free != NULL_BUFFER {
            if !seen.insert(free) {
                let cause = format!("free buffer {} visited twice", free);
                return Err(Error::structure(cause).into());
            }
            free = self.parse_free_buffer(free)?;
        }
        Ok(())
    }

    pub(super) fn deallocate_buffer(&mut self, buffer: u64) -> Result<()> {
        if self.buffer_tag(buffer)? == FREE {
            let cause = format!("buffer {} is already free", buffer);
            return Err(Error::structure(cause).into());
        }
        self.link_free_buffer(buffer)
    }

    fn link_free_buffer(&mut self, buffer: u64) -> Result<()> {
        let mut raw = BytesMut::with_capacity(FREE_BUFFER_SIZE);
        raw.put_u8(FREE);
        raw.put_u64_le(self.free_head);
        self.buffers.set_buffer(buffer, &raw)?;
        self.free_head = buffer;
        trace!("node buffer {} freed", buffer);
        Ok(())
    }
}

impl<K: Key, S: Stream> TreeIndex<K, u64> for BplusTreeLong<K, S> {
    fn get(&mut self, key: &K) -> Result<u64> {
        BplusTreeLong::get(self, key)
    }

    fn set(&mut self, key: K, value: u64) -> Result<()> {
        BplusTreeLong::set(self, key, value)
    }

    fn remove_key(&mut self, key: &K) -> Result<()> {
        BplusTreeLong::remove_key(self, key)
    }

    fn first_key(&mut self) -> Result<Option<K>> {
        BplusTreeLong::first_key(self)
    }

    fn next_key(&mut self, after: &K) -> Result<Option<K>> {
        BplusTreeLong::next_key(self, after)
    }

    fn contains_key(&mut self, key: &K) -> Result<bool> {
        BplusTreeLong::contains_key(self, key)
    }

    fn update_key(&mut self, key: &K, value: u64) -> Result<bool> {
        BplusTreeLong::update_key(self, key, value)
    }

    fn commit(&mut self) -> Result<()> {
        BplusTreeLong::commit(self)
    }

    fn abort(&mut self) -> Result<()> {
        BplusTreeLong::abort(self)
    }

    fn recover(&mut self, correct_errors: bool) -> Result<()> {
        BplusTreeLong::recover(self, correct_errors)
    }

    fn set_footprint_limit(&mut self, limit: usize) -> Result<()> {
        BplusTreeLong::set_footprint_limit(self, limit)
    }

    fn shutdown(&mut self) -> Result<()> {
        BplusTreeLong::shutdown(self)
    }
}

/// Nodes and buffers seen by a structure walk.
#[derive(Debug, Default)]
pub(super) struct Visited {
    pub(super) nodes: HashSet<NodeId>,
    pub(super) buffers: HashSet<u64>,
}
