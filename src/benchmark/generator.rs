use rand::{rngs::ThreadRng, Rng, RngCore};

pub struct Generator {
    key_size: usize,
    value: Vec<u8>,
    limit: u64,
    generated: u64,
    rng: ThreadRng,
}

impl Generator {
    pub fn new(key_size: usize, value_size: usize, limit: u64) -> Self {
        let mut rng = ThreadRng::default();
        let mut value = vec![0; value_size];
        rng.fill_bytes(&mut value);
        Self {
            key_size,
            value,
            limit,
            generated: 0,
            rng,
        }
    }

    /// Printable random key of `key_size` characters; the counter suffix keeps keys unique.
    pub fn next(&mut self) -> Option<(String, Vec<u8>)> {
        if self.generated >= self.limit {
            return None;
        }
        let suffix = format!("{:x}", self.generated);
        let random_len = self.key_size.saturating_sub(suffix.len());
        let mut key: String = (0..random_len)
            .map(|_| char::from(self.rng.gen_range(b'a'..=b'z')))
            .collect();
        key.push_str(&suffix);
        self.generated += 1;
        Some((key, self.value.clone()))
    }
}
