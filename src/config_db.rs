use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const SOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("sources");

/// Settings key for the embedder backend used at ingest time.
pub const EMBEDDER_KEY: &str = "embedder";
/// Settings key for the model id used at ingest time.
pub const MODEL_KEY: &str = "model";

/// Small key-value store for settings and the per-source ingest registry.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.open_table(SOURCES)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Sources --

    pub fn get_source(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCES)?;
        Ok(table.get(path)?.map(|v| v.value().to_vec()))
    }

    /// Set multiple source records in a single transaction.
    pub fn batch_set_sources(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SOURCES)?;
            for (path, data) in entries {
                table.insert(path.as_str(), data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove multiple source records in a single transaction.
    pub fn batch_remove_sources(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SOURCES)?;
            for path in paths {
                table.remove(path.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Return all (path, record bytes) pairs in a single read transaction.
    pub fn list_sources(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_vec()));
        }
        Ok(result)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
