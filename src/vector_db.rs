use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    chunk_id::ChunkId,
    corpus_index::{ChunkMetadata, CorpusIndex, IndexEntry, RetrievalHit, nearest},
    error::{Error, Result},
};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Header size: 4 bytes dimension + 4 bytes payload length.
const HEADER_SIZE: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    source_path: String,
    chunk_index: usize,
    text: String,
}

/// Persistent corpus index backed by redb, keyed by chunk id.
///
/// Binary format per entry:
/// - 4 bytes: embedding dimension D (u32 LE)
/// - 4 bytes: payload length P (u32 LE)
/// - D * 4 bytes: f32 LE embedding values
/// - P bytes: JSON payload with the source path, chunk index and text
///
/// Queries are exact: every entry is scored against the query vector.
pub struct VectorDb {
    db: Database,
}

impl VectorDb {
    /// Open or create an index database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docrag::corpus_index::CorpusIndex;
    /// use docrag::VectorDb;
    ///
    /// let db = VectorDb::open(&tmp.path().join("index.redb")).unwrap();
    /// assert!(db.is_empty().unwrap());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn load_all(&self) -> Result<Vec<IndexEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            entries.push(decode_entry(k.value(), v.value())?);
        }
        Ok(entries)
    }
}

impl CorpusIndex for VectorDb {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for entry in entries {
                let bytes = encode_entry(entry)?;
                table.insert(entry.chunk_id.as_str(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        candidate_count: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let entries = self.load_all()?;
        nearest(vector, &entries, candidate_count)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for id in ids {
                if table.remove(id.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

fn encode_entry(entry: &IndexEntry) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&Payload {
        source_path: entry.metadata.source_path.clone(),
        chunk_index: entry.metadata.chunk_index,
        text: entry.text.clone(),
    })?;

    let dimension = u32::try_from(entry.embedding.len())
        .map_err(|_| Error::capability("corpus index", "embedding too large"))?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| Error::capability("corpus index", "passage too large"))?;

    let mut bytes = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(entry.embedding.as_slice()) + payload.len(),
    );
    bytes.extend_from_slice(&dimension.to_le_bytes());
    bytes.extend_from_slice(&payload_len.to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(&entry.embedding));
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_entry(key: &str, bytes: &[u8]) -> Result<IndexEntry> {
    let corrupt = || {
        Error::capability("corpus index", format!("corrupt entry for chunk {key}"))
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt());
    }
    let dimension =
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let payload_len =
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let vector_end = HEADER_SIZE + dimension * 4;
    if bytes.len() != vector_end + payload_len {
        return Err(corrupt());
    }

    // Stored bytes carry no alignment guarantee, so decode value by value.
    let embedding = bytes[HEADER_SIZE..vector_end]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let payload: Payload = serde_json::from_slice(&bytes[vector_end..])?;

    Ok(IndexEntry {
        chunk_id: ChunkId::from_raw(key),
        embedding,
        metadata: ChunkMetadata {
            source_path: payload.source_path,
            chunk_index: payload.chunk_index,
        },
        text: payload.text,
    })
}
