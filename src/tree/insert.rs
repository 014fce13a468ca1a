use super::prelude::*;

impl<K: Key, S: Stream> BplusTreeLong<K, S> {
    /// Inserts below `id`. On split returns the separator and the new right sibling.
    pub(super) fn insert(&mut self, id: NodeId, key: K, value: u64) -> Result<Option<(K, NodeId)>> {
        if self.nodes[id].is_leaf {
            return self.insert_leaf(id, key, value);
        }
        let position = self.find_at_or_next_position(id, &key, false);
        if self.nodes[id].seeks[position] == NULL_BUFFER {
            return Err(Error::structure("internal node has no child for key").into());
        }
        let child = self.materialize(id, position)?;
        match self.insert(child, key, value)? {
            Some((separator, right)) => self.expand_node(id, position, separator, right),
            None => Ok(None),
        }
    }

    fn insert_leaf(&mut self, id: NodeId, key: K, value: u64) -> Result<Option<(K, NodeId)>> {
        let size = self.layout.node_size();
        let compare = self.compare;
        self.mark_dirty(id);
        let position = self.find_at_or_next_position(id, &key, false);
        let mut split = false;
        if position >= size {
            split = true;
            self.nodes[id].grow_for_split();
        } else {
            let node = &mut self.nodes[id];
            let replace = match &node.keys[position] {
                None => true,
                Some(existing) => compare(existing, &key) == Ordering::Equal,
            };
            if replace {
                node.keys[position] = Some(key);
                node.seeks[position] = value;
                return Ok(None);
            }
        }
        if !split && self.nodes[id].size_in_use() >= size {
            split = true;
            self.nodes[id].grow_for_split();
        }
        let node = &mut self.nodes[id];
        let mut carried_key = Some(key);
        let mut carried_value = value;
        let mut index = position;
        while let Some(key) = carried_key.take() {
            let next_key = node.keys[index].replace(key);
            let next_value = std::mem::replace(&mut node.seeks[index], carried_value);
            carried_key = next_key;
            carried_value = next_value;
            index += 1;
        }
        if !split {
            return Ok(None);
        }
        self.split_leaf(id).map(Some)
    }

    /// Splits an overfull leaf; the upper half moves to a new leaf whose first key is
    /// returned as separator.
    fn split_leaf(&mut self, id: NodeId) -> Result<(K, NodeId)> {
        let size = self.layout.node_size();
        let parent = self.nodes[id].parent;
        let node = &mut self.nodes[id];
        let mut keys = std::mem::take(&mut node.keys);
        let mut seeks = std::mem::take(&mut node.seeks);
        node.clear(size);
        let split_point = keys.len() / 2;
        let upper_keys = keys.split_off(split_point);
        let upper_seeks = seeks.split_off(split_point);
        for (index, key) in keys.into_iter().enumerate() {
            node.keys[index] = key;
            node.seeks[index] = seeks[index];
        }
        let right = self.new_node(parent, None, true);
        let right_node = &mut self.nodes[right];
        for (index, key) in upper_keys.into_iter().enumerate() {
            right_node.keys[index] = key;
            right_node.seeks[index] = upper_seeks[index];
        }
        let separator = right_node.keys[0]
            .clone()
            .ok_or_else(|| Error::structure("split leaf has empty upper half"))?;
        self.dump_to_fresh_buffer(right)?;
        self.record_terminal(right);
        self.mark_dirty(right);
        Ok((separator, right))
    }

    /// Inserts `right` after child `position`, separated by `separator`.
    fn expand_node(
        &mut self,
        id: NodeId,
        position: usize,
        separator: K,
        right: NodeId,
    ) -> Result<Option<(K, NodeId)>> {
        let size = self.layout.node_size();
        self.mark_dirty(id);
        let new_position = position + 1;
        let split = self.nodes[id].seeks[size] != NULL_BUFFER;
        let node = &mut self.nodes[id];
        if split {
            node.grow_for_split();
        }
        let last = node.keys.len() - 1;
        for index in (position..last).rev() {
            node.keys[index + 1] = node.keys[index].take();
            node.seeks[index + 2] = node.seeks[index + 1];
            node.children[index + 2] = node.children[index + 1];
        }
        node.keys[position] = Some(separator);
        self.reparent(right, id, new_position);
        let result = if split {
            Some(self.split_node(id)?)
        } else {
            None
        };
        self.reparent_all_children(id);
        Ok(result)
    }

    /// Splits an overfull internal node. The middle key moves up and stays in neither half.
    fn split_node(&mut self, id: NodeId) -> Result<(K, NodeId)> {
        let size = self.layout.node_size();
        let parent = self.nodes[id].parent;
        let node = &mut self.nodes[id];
        let mut keys = std::mem::take(&mut node.keys);
        let mut seeks = std::mem::take(&mut node.seeks);
        let mut children = std::mem::take(&mut node.children);
        let split_point = children.len() / 2 - 1;
        let separator = keys[split_point]
            .take()
            .ok_or_else(|| Error::structure("split point of internal node is empty"))?;
        let upper_keys = keys.split_off(split_point + 1);
        let upper_seeks = seeks.split_off(split_point + 1);
        let upper_children = children.split_off(split_point + 1);
        self.clear_node(id);
        let node = &mut self.nodes[id];
        for index in 0..=split_point {
            node.seeks[index] = seeks[index];
            node.children[index] = children[index];
        }
        for (index, key) in keys.into_iter().take(split_point).enumerate() {
            node.keys[index] = key;
        }
        let right = self.new_node(parent, None, false);
        let right_node = &mut self.nodes[right];
        for (index, key) in upper_keys.into_iter().enumerate() {
            right_node.keys[index] = key;
        }
        for (index, (seek, child)) in upper_seeks.into_iter().zip(upper_children).enumerate() {
            right_node.seeks[index] = seek;
            right_node.children[index] = child;
        }
        self.reparent_all_children(right);
        self.dump_to_fresh_buffer(right)?;
        self.check_if_terminal(right);
        self.mark_dirty(right);
        self.check_if_terminal(id);
        Ok((separator, right))
    }
}
