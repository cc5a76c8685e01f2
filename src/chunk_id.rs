use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of hex characters kept from the content hash (128 bits).
const ID_HEX_LEN: usize = 32;

/// A stable chunk identifier derived from `(source_path, chunk_index, text)`.
///
/// Identical content at the same position hashes to the same id, so
/// re-ingesting an unchanged document overwrites its entries in place.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Derive the id of a chunk.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrag::ChunkId;
    ///
    /// let a = ChunkId::new("notes/a.md", 0, "hello");
    /// let b = ChunkId::new("notes/a.md", 0, "hello");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 32);
    /// ```
    pub fn new(source_path: &str, chunk_index: usize, text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update(&(source_path.len() as u64).to_le_bytes());
        hasher.update(source_path.as_bytes());
        hasher.update(&(chunk_index as u64).to_le_bytes());
        hasher.update(&(text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());

        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..ID_HEX_LEN].to_string())
    }

    /// Wrap an id read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A shortened form for human display (e.g. "a1b2c3").
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(6)]
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
