//! Content digests for cache validation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit digest of a byte buffer, computed with XXH3.
///
/// Two buffers with the same `ContentHash` are assumed to be byte-identical.
/// Every cached build records the digests of its inputs, and a cached artifact
/// is only reused when the digests of the live inputs match the recorded ones.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Width of the digest in bytes.
    pub const LEN: usize = 16;

    /// Computes the digest of a byte slice using XXH3-128.
    ///
    /// An empty slice is valid input and yields the digest of the empty buffer.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
