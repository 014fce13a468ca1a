use super::prelude::*;
use bincode::{deserialize, serialize};
use static_assertions::const_assert_eq;

pub(crate) const TREE_MAGIC: [u8; 5] = [98, 112, 78, 98, 112];
pub(crate) const TREE_VERSION: u8 = 0;
pub(crate) const TREE_HEADER_SIZE: usize = 34;

const_assert_eq!(TREE_HEADER_SIZE, 5 + 1 + 4 * 3 + 8 * 2);

/// Stored key length includes the 2-byte length prefix of each key slot.
pub(super) const KEY_LENGTH_OVERHEAD: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct TreeHeader {
    magic: [u8; 5],
    version: u8,
    pub(super) node_size: i32,
    pub(super) key_length: i32,
    pub(super) culture_id: i32,
    pub(super) root_seek: u64,
    pub(super) free_head: u64,
}

impl TreeHeader {
    pub(super) fn new(layout: &Layout, culture_id: i32, root_seek: u64, free_head: u64) -> Self {
        Self {
            magic: TREE_MAGIC,
            version: TREE_VERSION,
            node_size: layout.node_size() as i32,
            key_length: (layout.max_key_length() + KEY_LENGTH_OVERHEAD) as i32,
            culture_id,
            root_seek,
            free_head,
        }
    }

    pub(super) fn to_raw(&self) -> bincode::Result<Vec<u8>> {
        serialize(self)
    }

    pub(super) fn from_raw(buf: &[u8]) -> Result<Self> {
        let header: Self = deserialize(buf)?;
        header.validate()?;
        Ok(header)
    }

    pub(super) fn layout(&self) -> Result<Layout> {
        let max_key_length = self.key_length as usize - KEY_LENGTH_OVERHEAD;
        Layout::new(self.node_size as usize, max_key_length)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != TREE_MAGIC {
            return Err(Error::structure("tree header magic mismatch").into());
        }
        if self.version != TREE_VERSION {
            let cause = format!(
                "tree version: {}, expected: {}",
                self.version, TREE_VERSION
            );
            return Err(Error::structure(cause).into());
        }
        if self.node_size < 2 {
            let cause = format!("node size in header too small: {}", self.node_size);
            return Err(Error::structure(cause).into());
        }
        if self.key_length < 5 {
            let cause = format!("key length in header too small: {}", self.key_length);
            return Err(Error::structure(cause).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_bit_exact() {
        let layout = Layout::new(2, 10).unwrap();
        let header = TreeHeader::new(&layout, 127, 3, NULL_BUFFER);
        let raw = header.to_raw().unwrap();
        assert_eq!(raw.len(), TREE_HEADER_SIZE);
        assert_eq!(&raw[..5], b"bpNbp");
        assert_eq!(raw[5], 0);
        assert_eq!(&raw[6..10], &2_i32.to_le_bytes());
        assert_eq!(&raw[10..14], &12_i32.to_le_bytes());
        assert_eq!(&raw[14..18], &127_i32.to_le_bytes());
        assert_eq!(&raw[18..26], &3_i64.to_le_bytes());
        assert_eq!(&raw[26..34], &(-1_i64).to_le_bytes());
        assert_eq!(TreeHeader::from_raw(&raw).unwrap(), header);
    }

    #[test]
    fn bad_magic_is_structural() {
        let layout = Layout::new(4, 8).unwrap();
        let mut raw = TreeHeader::new(&layout, 0, NULL_BUFFER, NULL_BUFFER)
            .to_raw()
            .unwrap();
        raw[0] = 0;
        let err = TreeHeader::from_raw(&raw).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    }
}
