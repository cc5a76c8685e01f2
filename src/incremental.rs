use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    chunk_id::ChunkId,
    config_db::ConfigDb,
    error::Result,
    walker::DiscoveredFile,
};

/// What the registry remembers about an ingested source file.
///
/// # Examples
///
/// ```
/// use docrag::incremental::SourceRecord;
///
/// let record = SourceRecord {
///     source_path: "hello.md".to_string(),
///     mtime: 1700000000,
///     chunk_ids: Vec::new(),
/// };
/// let bytes = record.serialize().unwrap();
/// assert_eq!(SourceRecord::deserialize(&bytes), Some(record));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_path: String,
    pub mtime: u64,
    pub chunk_ids: Vec<ChunkId>,
}

impl SourceRecord {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns `None` if the bytes are not a valid record.
    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Result of comparing discovered files against the source registry.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Files never ingested before.
    pub new_files: Vec<DiscoveredFile>,
    /// Files whose mtime differs from the stored one.
    pub changed_files: Vec<DiscoveredFile>,
    /// Number of files whose mtime matches.
    pub unchanged: usize,
    /// Registry records with no file on disk anymore.
    pub removed: Vec<SourceRecord>,
}

/// Load every record from the source registry, keyed by path.
///
/// Unreadable records are dropped so the file is treated as new.
pub fn load_records(config_db: &ConfigDb) -> Result<HashMap<String, SourceRecord>> {
    Ok(config_db
        .list_sources()?
        .into_iter()
        .filter_map(|(path, bytes)| {
            SourceRecord::deserialize(&bytes).map(|record| (path, record))
        })
        .collect())
}

/// Compare discovered files against the source registry.
pub fn diff_sources(
    config_db: &ConfigDb,
    discovered: &[DiscoveredFile],
) -> Result<DiffResult> {
    let mut known = load_records(config_db)?;
    let mut result = DiffResult::default();
    let mut seen = HashSet::new();

    for file in discovered {
        seen.insert(file.relative_path.as_str());
        match known.get(&file.relative_path) {
            None => result.new_files.push(file.clone()),
            Some(record) if record.mtime != file.mtime => {
                result.changed_files.push(file.clone());
            }
            Some(_) => result.unchanged += 1,
        }
    }

    known.retain(|path, _| !seen.contains(path.as_str()));
    let mut removed: Vec<SourceRecord> = known.into_values().collect();
    removed.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    result.removed = removed;

    Ok(result)
}

/// Chunk ids previously recorded for `path`, if any.
pub fn previous_chunk_ids(config_db: &ConfigDb, path: &str) -> Result<Vec<ChunkId>> {
    Ok(config_db
        .get_source(path)?
        .and_then(|bytes| SourceRecord::deserialize(&bytes))
        .map(|record| record.chunk_ids)
        .unwrap_or_default())
}

/// Store records for multiple sources in a single transaction.
pub fn batch_store_records(config_db: &ConfigDb, records: &[SourceRecord]) -> Result<()> {
    let entries = records
        .iter()
        .map(|record| Ok((record.source_path.clone(), record.serialize()?)))
        .collect::<Result<Vec<_>>>()?;
    config_db.batch_set_sources(&entries)
}
