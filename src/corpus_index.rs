//! The similarity-search capability consumed by ingestion and retrieval.

use std::{collections::HashMap, sync::RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    chunk_id::ChunkId,
    error::{Error, Result},
    scoring::cosine_distance,
};

/// Where a passage came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub chunk_index: usize,
}

/// A passage as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: ChunkId,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub text: String,
}

/// A passage returned by a nearest-neighbor query.
///
/// `distance` is the cosine distance to the query, in `[0, 2]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// Persistent nearest-neighbor store keyed by chunk id.
///
/// `upsert` is idempotent: writing an id that already exists replaces the
/// stored entry. Readers running alongside a writer may or may not observe
/// the new entries; callers must not rely on read-your-writes ordering.
pub trait CorpusIndex: Send + Sync {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Return at most `candidate_count` hits ordered by ascending distance.
    fn query(
        &self,
        vector: &[f32],
        candidate_count: usize,
    ) -> Result<Vec<RetrievalHit>>;

    /// Delete entries by id. Unknown ids are ignored.
    fn remove(&self, ids: &[ChunkId]) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Score `entries` against `vector` and keep the `n` closest.
///
/// Ties keep the order of `entries`.
pub(crate) fn nearest<'a, I>(
    vector: &[f32],
    entries: I,
    n: usize,
) -> Result<Vec<RetrievalHit>>
where
    I: IntoParallelIterator<Item = &'a IndexEntry>,
    I::Iter: IndexedParallelIterator,
{
    let scored: Vec<(f32, &IndexEntry)> = entries
        .into_par_iter()
        .map(|entry| {
            if entry.embedding.len() != vector.len() {
                return Err(Error::capability(
                    "corpus index",
                    format!(
                        "query has dimension {} but entry {} has {}",
                        vector.len(),
                        entry.chunk_id,
                        entry.embedding.len()
                    ),
                ));
            }
            Ok((cosine_distance(vector, &entry.embedding), entry))
        })
        .collect::<Result<_>>()?;

    let mut scored = scored;
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.truncate(n);

    Ok(scored
        .into_iter()
        .map(|(distance, entry)| RetrievalHit {
            chunk_id: entry.chunk_id.clone(),
            text: entry.text.clone(),
            metadata: entry.metadata.clone(),
            distance,
        })
        .collect())
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<IndexEntry>,
    positions: HashMap<ChunkId, usize>,
}

/// An in-process corpus index.
///
/// # Examples
///
/// ```
/// use docrag::corpus_index::{ChunkMetadata, CorpusIndex, IndexEntry, MemoryIndex};
/// use docrag::ChunkId;
///
/// let index = MemoryIndex::new();
/// let entry = IndexEntry {
///     chunk_id: ChunkId::new("a.md", 0, "hello"),
///     embedding: vec![1.0, 0.0],
///     metadata: ChunkMetadata { source_path: "a.md".into(), chunk_index: 0 },
///     text: "hello".into(),
/// };
/// index.upsert(&[entry.clone()]).unwrap();
/// index.upsert(&[entry]).unwrap();
/// assert_eq!(index.len().unwrap(), 1);
///
/// let hits = index.query(&[1.0, 0.0], 5).unwrap();
/// assert_eq!(hits[0].distance, 0.0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::capability("corpus index", "index lock poisoned")
    }
}

impl CorpusIndex for MemoryIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| Self::poisoned())?;
        let state = &mut *guard;
        for entry in entries {
            match state.positions.get(&entry.chunk_id) {
                Some(&pos) => state.entries[pos] = entry.clone(),
                None => {
                    let pos = state.entries.len();
                    state.positions.insert(entry.chunk_id.clone(), pos);
                    state.entries.push(entry.clone());
                }
            }
        }
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        candidate_count: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        nearest(vector, &state.entries, candidate_count)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut guard = self.state.write().map_err(|_| Self::poisoned())?;
        let state = &mut *guard;
        let before = state.entries.len();
        state.entries.retain(|e| !ids.contains(&e.chunk_id));
        let removed = before - state.entries.len();
        if removed > 0 {
            let positions = state
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.chunk_id.clone(), i))
                .collect();
            state.positions = positions;
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.entries.len())
    }
}
