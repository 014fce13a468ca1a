use super::prelude::*;

const LENGTH_PREFIX: usize = 4;

/// Keys sharing one prefix, kept sorted with their values.
///
/// Serialized as `(u32 key length | key | u32 value length | value)*`, little-endian.
pub struct XBucket<K> {
    keys: Vec<K>,
    values: Vec<Vec<u8>>,
    compare: Comparator<K>,
}

impl<K: Debug> Debug for XBucket<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("XBucket")
            .field("keys", &self.keys)
            .field("values", &self.values.len())
            .finish()
    }
}

impl<K: Key> XBucket<K> {
    /// Creates an empty bucket ordered by `compare`.
    pub fn new(compare: Comparator<K>) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            compare,
        }
    }

    /// Number of keys in the bucket.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Checks if the bucket holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Fills an empty bucket from its serialization.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the bucket is not empty or `raw` is malformed.
    pub fn load(&mut self, raw: &[u8]) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::structure("load into a non-empty bucket").into());
        }
        let mut buf = raw;
        while buf.has_remaining() {
            let key = K::from_bytes(take_field(&mut buf)?).context("bad key in bucket")?;
            let value = take_field(&mut buf)?.to_vec();
            self.keys.push(key);
            self.values.push(value);
        }
        Ok(())
    }

    /// Serializes the bucket.
    pub fn dump(&self) -> Vec<u8> {
        let size = self
            .keys
            .iter()
            .zip(&self.values)
            .map(|(key, value)| 2 * LENGTH_PREFIX + key.to_bytes().len() + value.len())
            .sum();
        let mut buf = BytesMut::with_capacity(size);
        for (key, value) in self.keys.iter().zip(&self.values) {
            let key = key.to_bytes();
            buf.put_u32_le(key.len() as u32);
            buf.put_slice(&key);
            buf.put_u32_le(value.len() as u32);
            buf.put_slice(value);
        }
        buf.to_vec()
    }

    /// Inserts `key` in order, or replaces its value.
    ///
    /// # Errors
    /// Fails with [`Kind::BadKeyValue`] if a new key would grow the bucket past `limit`;
    /// the bucket is unchanged then.
    pub fn add(&mut self, key: K, value: Vec<u8>, limit: Option<usize>) -> Result<()> {
        match self.search(&key) {
            Ok(index) => {
                self.keys[index] = key;
                self.values[index] = value;
            }
            Err(index) => {
                if let Some(limit) = limit {
                    if self.len() >= limit {
                        let cause = format!("bucket size limit {} exceeded by {:?}", limit, key);
                        return Err(Error::bad_key_value(cause).into());
                    }
                }
                self.keys.insert(index, key);
                self.values.insert(index, value);
            }
        }
        Ok(())
    }

    /// Removes `key`.
    ///
    /// # Errors
    /// Fails with [`Kind::KeyMissing`] if the key is not in the bucket.
    pub fn remove(&mut self, key: &K) -> Result<()> {
        let index = self
            .search(key)
            .map_err(|_| Error::key_missing(format!("no key {:?} in bucket", key)))?;
        self.keys.remove(index);
        self.values.remove(index);
        Ok(())
    }

    /// Returns the value of `key`.
    pub fn find(&self, key: &K) -> Option<&[u8]> {
        self.search(key).ok().map(|index| self.values[index].as_slice())
    }

    /// Returns the smallest key.
    pub fn first_key(&self) -> Option<&K> {
        self.keys.first()
    }

    /// Returns the smallest key greater than `after`.
    pub fn next_key(&self, after: &K) -> Option<&K> {
        let index = match self.search(after) {
            Ok(index) => index + 1,
            Err(index) => index,
        };
        self.keys.get(index)
    }

    fn search(&self, key: &K) -> std::result::Result<usize, usize> {
        self.keys
            .binary_search_by(|existing| (self.compare)(existing, key))
    }
}

fn take_field<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    if buf.remaining() < LENGTH_PREFIX {
        return Err(Error::structure("bucket field length is truncated").into());
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        let cause = format!("bucket field of {} bytes, {} left", len, buf.remaining());
        return Err(Error::structure(cause).into());
    }
    let slice: &'a [u8] = *buf;
    let (field, rest) = slice.split_at(len);
    *buf = rest;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(a: &String, b: &String) -> Ordering {
        a.cmp(b)
    }

    fn bucket(keys: &[&str]) -> XBucket<String> {
        let mut bucket = XBucket::new(compare);
        for key in keys {
            bucket
                .add(key.to_string(), key.as_bytes().to_vec(), None)
                .unwrap();
        }
        bucket
    }

    #[test]
    fn keys_stay_sorted() {
        let bucket = bucket(&["delta", "alpha", "charlie", "bravo"]);
        assert_eq!(bucket.first_key().unwrap(), "alpha");
        assert_eq!(bucket.next_key(&"bravo".to_string()).unwrap(), "charlie");
        assert_eq!(bucket.next_key(&"bz".to_string()).unwrap(), "charlie");
        assert!(bucket.next_key(&"delta".to_string()).is_none());
        assert_eq!(bucket.find(&"charlie".to_string()).unwrap(), b"charlie");
        assert!(bucket.find(&"echo".to_string()).is_none());
    }

    #[test]
    fn add_replaces_value() {
        let mut bucket = bucket(&["a", "b"]);
        bucket.add("a".to_string(), b"new".to_vec(), Some(2)).unwrap();
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.find(&"a".to_string()).unwrap(), b"new");
    }

    #[test]
    fn limit_rejects_new_keys_only() {
        let mut bucket = bucket(&["a", "b"]);
        let err = bucket.add("c".to_string(), vec![], Some(2)).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::BadKeyValue));
        assert_eq!(bucket.len(), 2);
        assert!(bucket.find(&"c".to_string()).is_none());
    }

    #[test]
    fn remove_missing_key() {
        let mut bucket = bucket(&["a"]);
        let err = bucket.remove(&"b".to_string()).unwrap_err();
        assert!(Error::is_key_missing(&err));
        bucket.remove(&"a".to_string()).unwrap();
        assert!(bucket.is_empty());
    }

    #[test]
    fn dump_layout() {
        let mut bucket = XBucket::new(compare);
        bucket.add("ab".to_string(), vec![7], None).unwrap();
        assert_eq!(bucket.dump(), vec![2, 0, 0, 0, b'a', b'b', 1, 0, 0, 0, 7]);
        let mut loaded = XBucket::new(compare);
        loaded.load(&bucket.dump()).unwrap();
        assert_eq!(loaded.find(&"ab".to_string()).unwrap(), &[7]);
        assert!(loaded.load(&bucket.dump()).is_err());
    }

    #[test]
    fn truncated_dump_is_rejected() {
        let raw = bucket(&["abc", "def"]).dump();
        let mut loaded = XBucket::<String>::new(compare);
        let err = loaded.load(&raw[..raw.len() - 1]).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    }
}
