/// Size of a SHA-256 digest.
pub const SHA256_DIGEST_SIZE: usize = 32;

#[derive(Clone, Copy)]
pub(crate) struct Hash {
    hash: hmac_sha256::Hash,
}

impl Hash {
    pub fn new() -> Self {
        Hash {
            hash: hmac_sha256::Hash::new(),
        }
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        self.hash.update(data);
    }

    pub fn finalize(&self) -> [u8; SHA256_DIGEST_SIZE] {
        self.hash.finalize()
    }
}

/// SHA-256 of a single buffer.
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; SHA256_DIGEST_SIZE] {
    let mut hasher = Hash::new();
    hasher.update(data);
    hasher.finalize()
}
