use super::prelude::*;

impl<K: Key, S: Stream> BplusTreeLong<K, S> {
    /// Adds a node to the arena; with `index` it becomes that child of `parent`.
    pub(super) fn new_node(
        &mut self,
        parent: Option<NodeId>,
        index: Option<usize>,
        is_leaf: bool,
    ) -> NodeId {
        let mut node = Node::new(is_leaf, self.layout.node_size());
        node.parent = parent;
        let slot = parent.zip(index);
        if let Some((parent, index)) = slot {
            node.index_in_parent = Some(index);
            node.buffer = self.nodes[parent].seeks[index];
        }
        let id = self.nodes.insert(node);
        if let Some((parent, index)) = slot {
            self.nodes[parent].children[index] = Some(id);
        }
        self.record_terminal(id);
        id
    }

    pub(super) fn clear_node(&mut self, id: NodeId) {
        self.nodes[id].clear(self.layout.node_size());
        self.record_terminal(id);
    }

    pub(super) fn record_terminal(&mut self, id: NodeId) {
        if Some(id) != self.root {
            self.terminals.record(id);
        }
    }

    pub(super) fn check_if_terminal(&mut self, id: NodeId) {
        if self.nodes[id].has_children() {
            self.terminals.forget(id);
        } else {
            self.record_terminal(id);
        }
    }

    /// Marks the node and every ancestor dirty.
    pub(super) fn mark_dirty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = &mut self.nodes[id];
            if node.dirty {
                return;
            }
            node.dirty = true;
            current = node.parent;
        }
    }

    /// Returns child `index` of `id`, loading it if needed.
    pub(super) fn materialize(&mut self, id: NodeId, index: usize) -> Result<NodeId> {
        let node = &self.nodes[id];
        if node.is_leaf {
            return Err(Error::structure("cannot materialize a child of a leaf").into());
        }
        if let Some(child) = node.children[index] {
            return Ok(child);
        }
        let seek = node.seeks[index];
        if seek == NULL_BUFFER {
            let cause = format!("no child at position {} to materialize", index);
            return Err(Error::structure(cause).into());
        }
        let child = self.new_node(Some(id), Some(index), true);
        self.load_node(child, seek)?;
        self.terminals.forget(id);
        Ok(child)
    }

    pub(super) fn load_node(&mut self, id: NodeId, buffer: u64) -> Result<()> {
        let mut raw = vec![0; self.layout.buffer_size()];
        self.buffers.get_buffer(buffer, &mut raw)?;
        self.clear_node(id);
        let layout = self.layout;
        let node = &mut self.nodes[id];
        node.load(&raw, &layout)
            .with_context(|| format!("failed to load node from buffer {}", buffer))?;
        node.dirty = false;
        node.buffer = buffer;
        Ok(())
    }

    /// Writes the node to a newly allocated buffer and releases the one it replaces.
    pub(super) fn dump_to_fresh_buffer(&mut self, id: NodeId) -> Result<u64> {
        let old = self.nodes[id].buffer;
        let fresh = self.allocate_buffer()?;
        self.dump_to_buffer(id, fresh)?;
        if old != NULL_BUFFER {
            if self.free_on_abort.remove(&old) {
                self.deallocate_buffer(old)?;
            } else {
                self.free_on_commit.insert(old);
            }
        }
        self.free_on_abort.insert(fresh);
        Ok(fresh)
    }

    fn dump_to_buffer(&mut self, id: NodeId, buffer: u64) -> Result<()> {
        let raw = self.nodes[id].dump(&self.layout)?;
        self.buffers.set_buffer(buffer, &raw)?;
        trace!("node dumped to buffer {}", buffer);
        let node = &mut self.nodes[id];
        node.dirty = false;
        node.buffer = buffer;
        if let Some((parent, index)) = node.parent_slot() {
            let parent_node = &mut self.nodes[parent];
            if parent_node.seeks[index] != buffer {
                if parent_node.children[index] != Some(id) {
                    return Err(Error::structure("parent does not point at dumped node").into());
                }
                parent_node.seeks[index] = buffer;
                self.mark_dirty(parent);
            }
        }
        Ok(())
    }

    /// Releases the buffer of a node leaving the tree.
    pub(super) fn free_node_buffer(&mut self, id: NodeId) -> Result<()> {
        let buffer = self.nodes[id].buffer;
        if buffer != NULL_BUFFER {
            if self.free_on_abort.remove(&buffer) {
                self.deallocate_buffer(buffer)?;
            } else {
                self.free_on_commit.insert(buffer);
            }
            self.nodes[id].buffer = NULL_BUFFER;
        }
        Ok(())
    }

    /// Frees the buffer of a dead node and drops it from memory.
    pub(super) fn release_node(&mut self, id: NodeId) -> Result<()> {
        self.free_node_buffer(id)?;
        self.terminals.forget(id);
        self.nodes.remove(id);
        Ok(())
    }

    /// Writes out the node and its loaded descendants and detaches it from its parent.
    ///
    /// Returns the buffer holding the node. With `destroy` the node leaves memory too.
    pub(super) fn invalidate(&mut self, id: NodeId, destroy: bool) -> Result<u64> {
        if !self.nodes[id].is_leaf {
            for index in 0..self.nodes[id].children.len() {
                if let Some(child) = self.nodes[id].children[index] {
                    let buffer = self.invalidate(child, true)?;
                    self.nodes[id].seeks[index] = buffer;
                }
            }
        }
        let mut result = self.nodes[id].buffer;
        if self.nodes[id].dirty {
            result = self.dump_to_fresh_buffer(id)?;
        }
        self.terminals.forget(id);
        if let Some((parent, index)) = self.nodes[id].parent_slot() {
            let parent_node = &mut self.nodes[parent];
            parent_node.children[index] = None;
            parent_node.seeks[index] = result;
            self.check_if_terminal(parent);
            self.nodes[id].index_in_parent = None;
        }
        if destroy {
            self.nodes.remove(id);
        }
        Ok(result)
    }

    /// Makes `child` slot `index` of `parent`.
    pub(super) fn reparent(&mut self, child: NodeId, parent: NodeId, index: usize) {
        let child_node = &mut self.nodes[child];
        child_node.parent = Some(parent);
        child_node.index_in_parent = Some(index);
        let buffer = child_node.buffer;
        let parent_node = &mut self.nodes[parent];
        parent_node.seeks[index] = buffer;
        parent_node.children[index] = Some(child);
        self.terminals.forget(parent);
    }

    pub(super) fn reparent_all_children(&mut self, id: NodeId) {
        for index in 0..self.nodes[id].children.len() {
            if let Some(child) = self.nodes[id].children[index] {
                self.reparent(child, id, index);
            }
        }
    }

    /// Detaches a node from its parent so it can serve as the root.
    pub(super) fn make_root(&mut self, id: NodeId) -> Result<()> {
        let node = &mut self.nodes[id];
        node.parent = None;
        node.index_in_parent = None;
        if node.buffer == NULL_BUFFER {
            return Err(Error::structure("new root has no buffer").into());
        }
        self.terminals.forget(id);
        Ok(())
    }

    /// New root over `left` and `right` separated by `separator`.
    pub(super) fn binary_root(&mut self, left: NodeId, separator: K, right: NodeId) -> NodeId {
        let root = self.new_node(None, None, false);
        self.nodes[root].keys[0] = Some(separator);
        self.reparent(left, root, 0);
        self.reparent(right, root, 1);
        self.terminals.forget(root);
        root
    }
}
