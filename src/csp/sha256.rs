//! SHA-256 hash backend

use sha2::{Digest, Sha256};

use super::Hasher;

/// Streaming SHA-256 hasher
#[derive(Default)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    /// Create a fresh hasher
    pub fn new() -> Self {
        Self::default()
    }
}

impl Hasher for Sha256Hasher {
    fn size(&self) -> usize {
        32
    }

    fn block_size(&self) -> usize {
        64
    }

    fn write(&mut self, block: &[u8]) -> usize {
        self.inner.update(block);
        block.len()
    }

    fn sum(self: Box<Self>, prefix: Option<&[u8]>) -> Vec<u8> {
        let mut out = prefix.map(<[u8]>::to_vec).unwrap_or_default();
        out.extend_from_slice(&self.inner.finalize());
        out
    }
}

/// One-shot digest, optionally prefixed
pub fn digest(block: &[u8], prefix: Option<&[u8]>) -> Vec<u8> {
    let mut hasher = Box::new(Sha256Hasher::new());
    hasher.write(block);
    hasher.sum(prefix)
}
