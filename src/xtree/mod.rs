mod bucket;
mod core;
mod hashed;

pub use self::bucket::XBucket;
pub use self::core::XBplusTreeBytes;
pub use self::hashed::HBplusTreeBytes;

/// Maps a full key to the prefix key its bucket is stored under.
pub(crate) type PrefixFn<K> = fn(&K, usize) -> anyhow::Result<K>;

/// Smallest prefix length a bucketed tree accepts.
pub const MIN_PREFIX_LENGTH: usize = 3;

mod prelude {
    pub(super) use super::bucket::XBucket;
    pub(super) use super::core::XBplusTreeBytes;
    pub(super) use super::{PrefixFn, MIN_PREFIX_LENGTH};
    pub(super) use crate::bytes_tree::BplusTreeBytes;
    pub(super) use crate::index::TreeIndex;
    pub(super) use crate::prelude::*;
}
