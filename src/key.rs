use crate::prelude::*;

/// Total order over keys, injected when a tree is built.
///
/// The order is not persisted, a tree must be reopened with the comparator it was built
/// with. The culture id in the tree header is informational only.
pub type Comparator<K> = fn(&K, &K) -> Ordering;

/// Trait `Key` must be implemented for any type used as a tree key.
///
/// Keys are stored as their byte encoding, bounded by the key length the tree was
/// created with.
pub trait Key: Clone + Debug {
    /// Encodes the key.
    fn to_bytes(&self) -> Vec<u8>;

    /// Decodes a key from bytes produced by [`Key::to_bytes`] or by a prefix digest.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if the bytes are not a valid key.
    fn from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Returns the longest prefix of the key whose encoding fits in `max_len` bytes.
    fn prefix(&self, max_len: usize) -> Self;
}

impl Key for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::bad_key_value(format!("key is not valid utf-8: {}", e)).into())
    }

    fn prefix(&self, max_len: usize) -> Self {
        if self.len() <= max_len {
            return self.clone();
        }
        let mut end = max_len;
        while !self.is_char_boundary(end) {
            end -= 1;
        }
        self[..end].to_string()
    }
}

impl Key for Vec<u8> {
    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }

    fn prefix(&self, max_len: usize) -> Self {
        self[..self.len().min(max_len)].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_prefix_keeps_char_boundary() {
        let key = "añb".to_string();
        assert_eq!(key.len(), 4);
        assert_eq!(key.prefix(2), "a");
        assert_eq!(key.prefix(3), "añ");
        assert_eq!(key.prefix(10), key);
    }

    #[test]
    fn invalid_utf8_is_bad_key() {
        let err = String::from_bytes(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::BadKeyValue));
    }

    #[test]
    fn bytes_prefix() {
        let key = vec![1_u8, 2, 3, 4];
        assert_eq!(key.prefix(3), vec![1, 2, 3]);
        assert_eq!(Vec::<u8>::from_bytes(&key.to_bytes()).unwrap(), key);
    }
}
