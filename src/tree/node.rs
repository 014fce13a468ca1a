use super::prelude::*;
use std::ops::{Index, IndexMut};

pub(crate) const NULL_BUFFER: u64 = u64::MAX;

pub(crate) const NONLEAF: u8 = 0;
pub(crate) const LEAF: u8 = 1;
pub(crate) const FREE: u8 = 2;

const KEY_LENGTH_PREFIX: usize = 2;
const SEEK_SIZE: usize = 8;

/// Geometry of a node buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    node_size: usize,
    max_key_length: usize,
}

impl Layout {
    pub(crate) fn new(node_size: usize, max_key_length: usize) -> Result<Self> {
        if node_size < 2 {
            return Err(Error::config(format!("node size must be at least 2: {}", node_size)).into());
        }
        if max_key_length < 3 {
            let cause = format!("key length must be at least 3: {}", max_key_length);
            return Err(Error::config(cause).into());
        }
        if max_key_length > i16::MAX as usize - KEY_LENGTH_PREFIX {
            return Err(Error::config(format!("key length too large: {}", max_key_length)).into());
        }
        if node_size > i32::MAX as usize / (max_key_length + 16) {
            return Err(Error::config(format!("node size too large: {}", node_size)).into());
        }
        Ok(Self {
            node_size,
            max_key_length,
        })
    }

    pub(crate) fn node_size(&self) -> usize {
        self.node_size
    }

    pub(crate) fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    /// Slot stride is `2 + max + 8`; every slot is followed by 2 bytes of slack kept for
    /// compatibility with existing files.
    pub(crate) fn buffer_size(&self) -> usize {
        1 + SEEK_SIZE + (self.max_key_length + 2 * KEY_LENGTH_PREFIX + SEEK_SIZE) * self.node_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

impl NodeId {
    #[cfg(test)]
    pub(super) fn new(slot: usize) -> Self {
        Self(slot)
    }
}

/// One tree node.
///
/// A leaf keeps the value of `keys[i]` in `seeks[i]`; an internal node keeps the child left
/// of `keys[i]` in `seeks[i]` and the child right of it in `seeks[i + 1]`. `children`
/// mirrors `seeks` for children currently loaded in the arena.
#[derive(Debug)]
pub(crate) struct Node<K> {
    pub(super) is_leaf: bool,
    pub(super) keys: Vec<Option<K>>,
    pub(super) seeks: Vec<u64>,
    pub(super) children: Vec<Option<NodeId>>,
    pub(super) buffer: u64,
    pub(super) parent: Option<NodeId>,
    pub(super) index_in_parent: Option<usize>,
    pub(super) dirty: bool,
}

impl<K> Node<K> {
    pub(super) fn new(is_leaf: bool, node_size: usize) -> Self {
        let mut node = Self {
            is_leaf,
            keys: Vec::new(),
            seeks: Vec::new(),
            children: Vec::new(),
            buffer: NULL_BUFFER,
            parent: None,
            index_in_parent: None,
            dirty: true,
        };
        node.clear(node_size);
        node
    }

    pub(super) fn clear(&mut self, node_size: usize) {
        self.keys = std::iter::repeat_with(|| None).take(node_size).collect();
        self.seeks = vec![NULL_BUFFER; node_size + 1];
        self.children = vec![None; node_size + 1];
    }

    /// Grows the arrays by one slot to hold an entry before splitting.
    pub(super) fn grow_for_split(&mut self) {
        self.keys.push(None);
        self.seeks.push(NULL_BUFFER);
        self.children.push(None);
    }

    pub(super) fn size_in_use(&self) -> usize {
        self.keys.iter().take_while(|key| key.is_some()).count()
    }

    pub(super) fn has_children(&self) -> bool {
        !self.is_leaf && self.children.iter().any(Option::is_some)
    }

    pub(super) fn parent_slot(&self) -> Option<(NodeId, usize)> {
        self.parent.zip(self.index_in_parent)
    }
}

impl<K: Key> Node<K> {
    pub(super) fn dump(&self, layout: &Layout) -> Result<Vec<u8>> {
        let max = layout.max_key_length();
        let mut buf = BytesMut::with_capacity(layout.buffer_size());
        buf.put_u8(if self.is_leaf { LEAF } else { NONLEAF });
        buf.put_u64_le(self.seeks[0]);
        let mut seen_empty = false;
        for (i, key) in self.keys.iter().enumerate().take(layout.node_size()) {
            let seek = self.seeks[i + 1];
            match key {
                Some(key) => {
                    if seen_empty {
                        let cause = format!("key {:?} follows an empty slot", key);
                        return Err(Error::structure(cause).into());
                    }
                    let bytes = key.to_bytes();
                    if bytes.len() > max {
                        let cause = format!("key {:?} longer than {} bytes", key, max);
                        return Err(Error::bad_key_value(cause).into());
                    }
                    buf.put_i16_le(bytes.len() as i16);
                    buf.put_slice(&bytes);
                    buf.put_bytes(0, max - bytes.len());
                }
                None => {
                    seen_empty = true;
                    if !self.is_leaf && seek != NULL_BUFFER {
                        return Err(Error::structure("empty key with a child to its right").into());
                    }
                    buf.put_i16_le(-1);
                    buf.put_bytes(0, max);
                }
            }
            buf.put_u64_le(seek);
        }
        buf.resize(layout.buffer_size(), 0);
        Ok(buf.to_vec())
    }

    /// Replaces contents with `raw`. Arrays must be cleared first.
    pub(super) fn load(&mut self, raw: &[u8], layout: &Layout) -> Result<()> {
        let max = layout.max_key_length();
        if raw.len() < layout.buffer_size() {
            let cause = format!("node buffer too short: {}", raw.len());
            return Err(Error::structure(cause).into());
        }
        let mut buf = raw;
        self.is_leaf = match buf.get_u8() {
            LEAF => true,
            NONLEAF => false,
            other => {
                let cause = format!("buffer is not a node, tag: {}", other);
                return Err(Error::structure(cause).into());
            }
        };
        self.seeks[0] = buf.get_u64_le();
        for i in 0..layout.node_size() {
            let length = buf.get_i16_le();
            if length < -1 || length > max as i16 {
                let cause = format!("bad key length in node: {}", length);
                return Err(Error::structure(cause).into());
            }
            self.keys[i] = if length >= 0 {
                let key = K::from_bytes(&buf[..length as usize])
                    .context("failed to decode key stored in node")?;
                Some(key)
            } else {
                None
            };
            buf.advance(max);
            let seek = buf.get_u64_le();
            if self.keys[i].is_none() && !self.is_leaf && seek != NULL_BUFFER {
                return Err(Error::structure("empty key with a child to its right").into());
            }
            self.seeks[i + 1] = seek;
        }
        Ok(())
    }
}

/// Slot storage for the nodes loaded in memory.
///
/// Parents and children refer to each other by `NodeId`; ids of removed nodes are reused.
#[derive(Debug)]
pub(crate) struct Arena<K> {
    slots: Vec<Option<Node<K>>>,
    vacant: Vec<usize>,
}

impl<K> Arena<K> {
    pub(super) fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
        }
    }

    pub(super) fn insert(&mut self, node: Node<K>) -> NodeId {
        if let Some(slot) = self.vacant.pop() {
            self.slots[slot] = Some(node);
            NodeId(slot)
        } else {
            self.slots.push(Some(node));
            NodeId(self.slots.len() - 1)
        }
    }

    pub(super) fn remove(&mut self, id: NodeId) -> Option<Node<K>> {
        let node = self.slots.get_mut(id.0)?.take();
        if node.is_some() {
            self.vacant.push(id.0);
        }
        node
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    pub(super) fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
    }
}

impl<K> Index<NodeId> for Arena<K> {
    type Output = Node<K>;

    fn index(&self, id: NodeId) -> &Node<K> {
        self.slots[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("node {:?} was removed", id))
    }
}

impl<K> IndexMut<NodeId> for Arena<K> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<K> {
        self.slots[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("node {:?} was removed", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[&str]) -> Node<String> {
        let mut node = Node::new(true, 4);
        for (i, key) in keys.iter().enumerate() {
            node.keys[i] = Some(key.to_string());
            node.seeks[i] = i as u64 * 100;
        }
        node
    }

    #[test]
    fn buffer_layout() {
        let layout = Layout::new(4, 6).unwrap();
        assert_eq!(layout.buffer_size(), 1 + 8 + (6 + 4 + 8) * 4);
        let raw = leaf(&["ab", "c"]).dump(&layout).unwrap();
        assert_eq!(raw.len(), layout.buffer_size());
        assert_eq!(raw[0], LEAF);
        assert_eq!(&raw[1..9], &0_u64.to_le_bytes());
        assert_eq!(&raw[9..11], &2_i16.to_le_bytes());
        assert_eq!(&raw[11..13], b"ab");
        assert_eq!(&raw[13..17], &[0; 4]);
        assert_eq!(&raw[17..25], &100_u64.to_le_bytes());
        assert_eq!(&raw[25..27], &1_i16.to_le_bytes());
        assert_eq!(&raw[41..43], &(-1_i16).to_le_bytes());
    }

    #[test]
    fn dump_load_keeps_empty_keys() {
        let layout = Layout::new(4, 6).unwrap();
        let node = leaf(&["", "b", "cdefgh"]);
        let raw = node.dump(&layout).unwrap();
        let mut loaded = Node::<String>::new(false, 4);
        loaded.load(&raw, &layout).unwrap();
        assert!(loaded.is_leaf);
        assert_eq!(loaded.keys, node.keys);
        assert_eq!(loaded.seeks, node.seeks);
        assert_eq!(loaded.size_in_use(), 3);
    }

    #[test]
    fn oversized_key_is_rejected() {
        let layout = Layout::new(4, 3).unwrap();
        let err = leaf(&["abcd"]).dump(&layout).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::BadKeyValue));
    }

    #[test]
    fn free_buffer_is_not_a_node() {
        let layout = Layout::new(2, 4).unwrap();
        let mut raw = vec![0; layout.buffer_size()];
        raw[0] = FREE;
        let mut node = Node::<String>::new(true, 2);
        let err = node.load(&raw, &layout).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    }

    #[test]
    fn arena_reuses_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(Node::<String>::new(true, 2));
        let b = arena.insert(Node::<String>::new(false, 2));
        assert_eq!(arena.len(), 2);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        let c = arena.insert(Node::new(true, 2));
        assert_eq!(c, a);
        assert!(!arena[b].is_leaf);
        assert_eq!(arena.len(), 2);
    }
}
