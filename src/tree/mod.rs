mod cache;
mod core;
mod delete;
mod header;
mod insert;
mod node;
mod paging;
mod search;
#[cfg(test)]
mod tests;

pub use self::core::BplusTreeLong;
pub(crate) use self::core::DEFAULT_FOOTPRINT_LIMIT;

mod prelude {
    pub(super) use super::cache::TerminalCache;
    pub(super) use super::core::BplusTreeLong;
    pub(super) use super::header::{TreeHeader, TREE_HEADER_SIZE};
    pub(super) use super::node::{Arena, Layout, Node, NodeId, FREE, NULL_BUFFER};
    pub(super) use crate::prelude::*;
}
