use super::prelude::*;

impl<K: Key, S: Stream> BplusTreeLong<K, S> {
    /// Deletes `key` below `id`.
    ///
    /// Returns the new least key of the subtree when it changed, and whether the node fell
    /// below half full and should be merged by its parent.
    pub(super) fn delete(&mut self, id: NodeId, key: &K) -> Result<(Option<K>, bool)> {
        if self.nodes[id].is_leaf {
            return self.delete_leaf(id, key);
        }
        let size = self.layout.node_size();
        let compare = self.compare;
        let position = self.find_at_or_next_position(id, key, false);
        if self.nodes[id].seeks[position] == NULL_BUFFER {
            return Err(Error::structure("internal node has no child for key").into());
        }
        let child = self.materialize(id, position)?;
        let (least, merge_child) = self.delete(child, key)?;
        self.mark_dirty(id);
        if matches!(&least, Some(least) if compare(least, key) == Ordering::Equal) {
            // only a leaf left empty reports the deleted key back
            if size > 3 {
                return Err(Error::structure("emptied leaf in a tree with node size over 3").into());
            }
            return self.remove_empty_child(id, position, child, key);
        }
        let mut result = None;
        if position == 0 {
            result = least;
        } else if let Some(least) = least {
            self.nodes[id].keys[position - 1] = Some(least);
        }
        let mut merge_me = false;
        if merge_child {
            let (left_position, left, right) = if position == 0 {
                (0, child, self.materialize(id, 1)?)
            } else {
                (position - 1, self.materialize(id, position - 1)?, child)
            };
            let separator = self.nodes[id].keys[left_position]
                .clone()
                .ok_or_else(|| Error::structure("no separator between merged children"))?;
            let (right_least, delete_right) = self.merge(left, separator, right)?;
            let node = &mut self.nodes[id];
            if delete_right {
                for index in left_position + 1..size {
                    node.keys[index - 1] = node.keys[index].take();
                    node.seeks[index] = node.seeks[index + 1];
                    node.children[index] = node.children[index + 1];
                }
                node.keys[size - 1] = None;
                node.seeks[size] = NULL_BUFFER;
                node.children[size] = None;
                merge_me = node.size_in_use() < size / 2;
                self.release_node(right)?;
                self.reparent_all_children(id);
            } else {
                node.keys[left_position] = right_least;
            }
        }
        Ok((result, merge_me))
    }

    /// Drops the emptied leaf at `position`.
    fn remove_empty_child(
        &mut self,
        id: NodeId,
        position: usize,
        child: NodeId,
        key: &K,
    ) -> Result<(Option<K>, bool)> {
        let size = self.layout.node_size();
        let compare = self.compare;
        let mut result = None;
        let node = &mut self.nodes[id];
        if position == 0 {
            result = node.keys[0].clone();
        } else if position == size {
            node.keys[position - 1] = None;
        } else {
            node.keys[position - 1] = node.keys[position].clone();
        }
        if matches!(&result, Some(least) if compare(least, key) == Ordering::Equal) {
            let next = self.materialize(id, 1)?;
            result = Some(self.least_key(next)?);
        }
        self.release_node(child)?;
        let node = &mut self.nodes[id];
        for index in position..size - 1 {
            node.keys[index] = node.keys[index + 1].take();
            node.seeks[index] = node.seeks[index + 1];
            node.children[index] = node.children[index + 1];
        }
        node.keys[size - 1] = None;
        if position < size {
            node.seeks[size - 1] = node.seeks[size];
            node.children[size - 1] = node.children[size];
        }
        node.seeks[size] = NULL_BUFFER;
        node.children[size] = None;
        let merge_me = node.size_in_use() < size / 2;
        self.reparent_all_children(id);
        self.check_if_terminal(id);
        Ok((result, merge_me))
    }

    fn delete_leaf(&mut self, id: NodeId, key: &K) -> Result<(Option<K>, bool)> {
        let size = self.layout.node_size();
        let compare = self.compare;
        let location = self.nodes[id]
            .keys
            .iter()
            .position(|slot| matches!(slot, Some(existing) if compare(existing, key) == Ordering::Equal))
            .ok_or_else(|| Error::key_missing(format!("key not found: {:?}", key)))?;
        self.mark_dirty(id);
        let node = &mut self.nodes[id];
        for index in location..size - 1 {
            node.keys[index] = node.keys[index + 1].take();
            node.seeks[index] = node.seeks[index + 1];
        }
        node.keys[size - 1] = None;
        node.seeks[size - 1] = NULL_BUFFER;
        let merge_me = node.size_in_use() < size / 2;
        let least = if location == 0 {
            Some(node.keys[0].clone().unwrap_or_else(|| key.clone()))
        } else {
            None
        };
        Ok((least, merge_me))
    }

    /// Merges two adjacent siblings.
    ///
    /// Returns `true` when everything fit into `left` and `right` must be released;
    /// otherwise the entries are spread evenly and the new least key of `right` is returned.
    fn merge(&mut self, left: NodeId, separator: K, right: NodeId) -> Result<(Option<K>, bool)> {
        let (left_leaf, right_leaf) = (self.nodes[left].is_leaf, self.nodes[right].is_leaf);
        if left_leaf || right_leaf {
            if !(left_leaf && right_leaf) {
                return Err(Error::structure("cannot merge a leaf with an internal node").into());
            }
            let delete_right = self.merge_leaves(left, right)?;
            return Ok((self.nodes[right].keys[0].clone(), delete_right));
        }
        let size = self.layout.node_size();
        if self.nodes[left].seeks[0] == NULL_BUFFER || self.nodes[right].seeks[0] == NULL_BUFFER {
            return Err(Error::structure("merged internal node has no first child").into());
        }
        let mut keys = Vec::with_capacity(2 * size + 1);
        let mut seeks = Vec::with_capacity(2 * size + 2);
        let mut children = Vec::with_capacity(2 * size + 2);
        for (id, between) in [(left, Some(separator)), (right, None)] {
            let node = &mut self.nodes[id];
            seeks.push(node.seeks[0]);
            children.push(node.children[0]);
            for index in 0..size {
                let Some(key) = node.keys[index].take() else {
                    break;
                };
                keys.push(key);
                seeks.push(node.seeks[index + 1]);
                children.push(node.children[index + 1]);
            }
            if let Some(between) = between {
                keys.push(between);
            }
        }
        let count = keys.len();
        if count <= size {
            let node = &mut self.nodes[left];
            node.clear(size);
            for (index, key) in keys.into_iter().enumerate() {
                node.keys[index] = Some(key);
            }
            for (index, (seek, child)) in seeks.into_iter().zip(children).enumerate() {
                node.seeks[index] = seek;
                node.children[index] = child;
            }
            self.reparent_all_children(left);
            self.mark_dirty(left);
            self.check_if_terminal(left);
            return Ok((None, true));
        }
        self.clear_node(left);
        self.clear_node(right);
        self.mark_dirty(left);
        self.mark_dirty(right);
        let left_count = count / 2;
        let mut keys = keys.into_iter();
        let mut seeks = seeks.into_iter();
        let mut children = children.into_iter();
        let mut fill = |node: &mut Node<K>, count: usize, keys: &mut dyn Iterator<Item = K>| {
            for index in 0..count {
                node.keys[index] = keys.next();
                node.seeks[index] = seeks.next().unwrap_or(NULL_BUFFER);
                node.children[index] = children.next().flatten();
            }
            node.seeks[count] = seeks.next().unwrap_or(NULL_BUFFER);
            node.children[count] = children.next().flatten();
        };
        fill(&mut self.nodes[left], left_count, &mut keys);
        let right_least = keys.next();
        let right_count = count - left_count - 1;
        fill(&mut self.nodes[right], right_count, &mut keys);
        self.reparent_all_children(left);
        self.reparent_all_children(right);
        self.check_if_terminal(left);
        self.check_if_terminal(right);
        Ok((right_least, false))
    }

    /// Returns `true` when all keys moved into `left`.
    fn merge_leaves(&mut self, left: NodeId, right: NodeId) -> Result<bool> {
        let size = self.layout.node_size();
        let mut entries = Vec::with_capacity(2 * size);
        for id in [left, right] {
            let node = &mut self.nodes[id];
            for index in 0..size {
                let Some(key) = node.keys[index].take() else {
                    break;
                };
                entries.push((key, node.seeks[index]));
            }
        }
        let count = entries.len();
        if count <= size {
            self.clear_node(left);
            let node = &mut self.nodes[left];
            for (index, (key, seek)) in entries.into_iter().enumerate() {
                node.keys[index] = Some(key);
                node.seeks[index] = seek;
            }
            self.mark_dirty(left);
            return Ok(true);
        }
        self.clear_node(left);
        self.clear_node(right);
        self.mark_dirty(left);
        self.mark_dirty(right);
        let right_count = count / 2;
        let left_count = count - right_count;
        let mut entries = entries.into_iter();
        for (id, count) in [(left, left_count), (right, right_count)] {
            let node = &mut self.nodes[id];
            for (index, (key, seek)) in entries.by_ref().take(count).enumerate() {
                node.keys[index] = Some(key);
                node.seeks[index] = seek;
            }
        }
        Ok(false)
    }
}
