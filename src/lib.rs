#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

//! # bsharptree
//!
//! The `bsharptree` crate provides an embedded, file-backed B+tree key-value storage.
//!
//! Trees never overwrite committed data in place: every changed node or value chunk is
//! written to a fresh buffer, and the replaced buffers are reclaimed only after the new
//! root is durably recorded in the file header. A crash between commits therefore never
//! damages the last committed state; leaked space is reclaimed by `recover`.
//!
//! The layers, from the bottom up:
//! * [`BufferFile`] fixed-size blocks over a seekable stream
//! * [`LinkedFile`] variable-length chunks built from chained buffers
//! * [`BplusTreeLong`] keys mapped to 64-bit values
//! * [`BplusTreeBytes`] keys mapped to byte values
//! * [`XBplusTreeBytes`] and [`HBplusTreeBytes`] unbounded keys grouped into prefix buckets
//!
//! # Examples
//!
//! ```no_run
//! use bsharptree::{Builder, TreeIndex};
//! use std::io::Cursor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut tree = Builder::<String>::new()
//!     .key_length(32)
//!     .node_size(16)
//!     .create_bytes(Cursor::new(Vec::new()), Cursor::new(Vec::new()))?;
//! tree.set("hello".to_string(), b"world")?;
//! tree.commit()?;
//! assert_eq!(tree.get(&"hello".to_string())?, b"world".to_vec());
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

/// Types representing the file layers under the trees.
pub mod io;

mod buffer_file;
mod builder;
mod bytes_tree;
mod error;
mod index;
mod key;
mod linked_file;
mod tree;
mod typed;
mod xtree;

pub use buffer_file::BufferFile;
pub use builder::{Builder, Config};
pub use bytes_tree::BplusTreeBytes;
pub use error::{Error, Kind};
pub use index::{Keys, TreeIndex};
pub use key::{Comparator, Key};
pub use linked_file::LinkedFile;
pub use tree::BplusTreeLong;
pub use typed::{BincodeValues, BplusTree, Utf8Values, ValueConverter};
pub use xtree::{HBplusTreeBytes, XBplusTreeBytes, XBucket};

mod prelude {
    pub(crate) use crate::error::{Error, Kind};
    pub(crate) use crate::io::Stream;
    pub(crate) use crate::key::{Comparator, Key};
    pub(crate) use anyhow::{Context, Result};
    pub(crate) use bytes::{Buf, BufMut, BytesMut};
    pub(crate) use std::{
        cmp::Ordering,
        collections::{HashMap, HashSet, VecDeque},
        fmt::{Debug, Display, Formatter, Result as FmtResult},
        io::{Read, Seek, SeekFrom, Write},
        marker::PhantomData,
        path::Path,
    };
}
