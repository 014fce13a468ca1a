use super::prelude::*;

/// Terminal nodes in the order they were recorded.
///
/// Eviction is strict FIFO by recording order: touching a node again does not move it.
/// Forgotten nodes stay in the queue as stale entries and are skipped on pop.
#[derive(Debug, Default)]
pub(super) struct TerminalCache {
    queue: VecDeque<(u64, NodeId)>,
    index: HashMap<NodeId, u64>,
    next_id: u64,
}

impl TerminalCache {
    pub(super) fn record(&mut self, node: NodeId) {
        if self.index.contains_key(&node) {
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.index.insert(node, id);
        self.queue.push_back((id, node));
        if self.queue.len() > 2 * self.index.len() + 64 {
            let index = &self.index;
            self.queue.retain(|(id, node)| index.get(node) == Some(id));
        }
    }

    pub(super) fn forget(&mut self, node: NodeId) {
        self.index.remove(&node);
    }

    pub(super) fn pop_oldest(&mut self) -> Option<NodeId> {
        while let Some((id, node)) = self.queue.pop_front() {
            if self.index.get(&node) == Some(&id) {
                self.index.remove(&node);
                return Some(node);
            }
        }
        None
    }

    pub(super) fn contains(&self, node: NodeId) -> bool {
        self.index.contains_key(&node)
    }

    pub(super) fn len(&self) -> usize {
        self.index.len()
    }

    pub(super) fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }
}
