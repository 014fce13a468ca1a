use super::core::Visited;
use super::prelude::*;

impl<K: Key, S: Stream> BplusTreeLong<K, S> {
    /// First slot whose key is not less than `key` in a leaf, or greater than `key` in an
    /// internal node or with `look_past_only`.
    pub(super) fn find_at_or_next_position(&self, id: NodeId, key: &K, look_past_only: bool) -> usize {
        let node = &self.nodes[id];
        let strict = !node.is_leaf || look_past_only;
        node.keys
            .iter()
            .take(self.layout.node_size())
            .position(|slot| match slot {
                None => true,
                Some(existing) => {
                    let order = (self.compare)(existing, key);
                    order == Ordering::Greater || (!strict && order == Ordering::Equal)
                }
            })
            .unwrap_or(self.layout.node_size())
    }

    /// Descends to the leaf responsible for `key`.
    fn find_leaf(&mut self, key: &K, look_past_only: bool) -> Result<Option<(NodeId, usize)>> {
        let Some(mut id) = self.root else {
            return Ok(None);
        };
        loop {
            let position = self.find_at_or_next_position(id, key, look_past_only);
            if self.nodes[id].is_leaf {
                return Ok(Some((id, position)));
            }
            if self.nodes[id].seeks[position] == NULL_BUFFER {
                return Err(Error::structure("internal node has no child for key").into());
            }
            id = self.materialize(id, position)?;
        }
    }

    fn matching_slot(&mut self, key: &K) -> Result<Option<(NodeId, usize)>> {
        let Some((leaf, position)) = self.find_leaf(key, false)? else {
            return Ok(None);
        };
        let matches = self.nodes[leaf]
            .keys
            .get(position)
            .and_then(Option::as_ref)
            .map_or(false, |existing| (self.compare)(existing, key) == Ordering::Equal);
        Ok(matches.then_some((leaf, position)))
    }

    pub(super) fn find_match(&mut self, key: &K) -> Result<Option<u64>> {
        Ok(self
            .matching_slot(key)?
            .map(|(leaf, position)| self.nodes[leaf].seeks[position]))
    }

    pub(super) fn update_match(&mut self, key: &K, value: u64) -> Result<bool> {
        let Some((leaf, position)) = self.matching_slot(key)? else {
            return Ok(false);
        };
        self.nodes[leaf].seeks[position] = value;
        self.mark_dirty(leaf);
        Ok(true)
    }

    pub(super) fn find_next_key(&mut self, after: &K) -> Result<Option<K>> {
        let Some((leaf, position)) = self.find_leaf(after, true)? else {
            return Ok(None);
        };
        self.traverse_to_following_key(leaf, position)
    }

    /// Returns the key at `position` of `id` or, past the last key, the first key of the
    /// following leaves.
    pub(super) fn traverse_to_following_key(&mut self, id: NodeId, position: usize) -> Result<Option<K>> {
        let size = self.layout.node_size();
        let (mut id, mut position) = (id, position);
        loop {
            let node = &self.nodes[id];
            let exhausted = if node.is_leaf {
                position >= size || node.keys[position].is_none()
            } else {
                position > size || (position > 0 && node.keys[position - 1].is_none())
            };
            if exhausted {
                let Some((parent, index)) = node.parent_slot() else {
                    return Ok(None);
                };
                id = parent;
                position = index + 1;
                continue;
            }
            if node.is_leaf {
                return Ok(node.keys[position].clone());
            }
            id = self.materialize(id, position)?;
            position = 0;
        }
    }

    pub(super) fn least_key(&mut self, id: NodeId) -> Result<K> {
        let mut id = id;
        while !self.nodes[id].is_leaf {
            id = self.materialize(id, 0)?;
        }
        self.nodes[id].keys[0]
            .clone()
            .ok_or_else(|| Error::structure("no least key in leaf").into())
    }

    /// Walks the subtree checking structure; returns its least key.
    pub(super) fn sanity_check_node(&mut self, id: NodeId, visited: &mut Visited) -> Result<Option<K>> {
        let size = self.layout.node_size();
        if !visited.nodes.insert(id) {
            return Err(Error::structure("node visited twice").into());
        }
        let buffer = self.nodes[id].buffer;
        if buffer != NULL_BUFFER && !visited.buffers.insert(buffer) {
            let cause = format!("buffer {} referenced twice", buffer);
            return Err(Error::structure(cause).into());
        }
        if let Some((parent, index)) = self.nodes[id].parent_slot() {
            if self.nodes[parent].is_leaf {
                return Err(Error::structure("parent is a leaf").into());
            }
            if self.nodes[parent].children[index] != Some(id) {
                return Err(Error::structure("incorrect index in parent").into());
            }
            let in_use = self.nodes[id].size_in_use();
            if in_use < size / 2 {
                let cause = format!("node holds {} keys, at least {} expected", in_use, size / 2);
                return Err(Error::structure(cause).into());
            }
        }
        let node = &self.nodes[id];
        for pair in node.keys.windows(2) {
            if let [Some(a), Some(b)] = pair {
                if (self.compare)(a, b) != Ordering::Less {
                    let cause = format!("keys out of order in node: {:?} then {:?}", a, b);
                    return Err(Error::structure(cause).into());
                }
            }
        }
        if let Some(index) = node.keys.iter().position(Option::is_none) {
            if node.keys[index..].iter().any(Option::is_some) {
                return Err(Error::structure("key follows an empty slot").into());
            }
        }
        if node.is_leaf {
            return Ok(node.keys[0].clone());
        }
        let first = self.materialize(id, 0)?;
        let result = self.sanity_check_node(first, visited)?;
        for index in 0..size {
            let Some(separator) = self.nodes[id].keys[index].clone() else {
                break;
            };
            let child = self.materialize(id, index + 1)?;
            let least = self
                .sanity_check_node(child, visited)?
                .ok_or_else(|| Error::structure("child has no least key"))?;
            if (self.compare)(&least, &separator) != Ordering::Equal {
                let cause = format!(
                    "separator {:?} does not match least key {:?} of its child",
                    separator, least
                );
                return Err(Error::structure(cause).into());
            }
        }
        Ok(result)
    }

    /// Renders the loaded part of the tree, one node per line.
    pub fn describe(&mut self) -> Result<String> {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.describe_node(root, 0, &mut out)?;
        } else {
            out.push_str("<empty>\n");
        }
        Ok(out)
    }

    fn describe_node(&mut self, id: NodeId, depth: usize, out: &mut String) -> Result<()> {
        let node = &self.nodes[id];
        let keys: Vec<_> = node.keys.iter().flatten().collect();
        let kind = if node.is_leaf { "leaf" } else { "node" };
        out.push_str(&format!(
            "{:indent$}{} @{} {:?}\n",
            "",
            kind,
            node.buffer as i64,
            keys,
            indent = depth * 2
        ));
        if node.is_leaf {
            return Ok(());
        }
        let children = node.size_in_use() + 1;
        for index in 0..children {
            let child = self.materialize(id, index)?;
            self.describe_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}
