use std::{fmt, path::PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// A named step of the ingestion or retrieval pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Query embedding and nearest-neighbor candidate fetch.
    Fetch,
    /// Maximal marginal relevance re-selection.
    Diversity,
    /// BM25 / vector score mixing.
    Fusion,
    /// Pairwise (cross-encoder) reranking.
    Rerank,
    /// Chunk embedding and index upsert on the write path.
    Ingest,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Diversity => "diversity",
            Stage::Fusion => "fusion",
            Stage::Rerank => "rerank",
            Stage::Ingest => "ingest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// An external capability (embedder, index, scorer) failed or
    /// returned a malformed response.
    #[error("{capability} error: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub fn capability(
        capability: &'static str,
        message: impl fmt::Display,
    ) -> Self {
        Error::Capability {
            capability,
            message: message.to_string(),
        }
    }

    /// Tag this error with the pipeline stage that was running.
    ///
    /// An error that already carries a stage keeps it.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The pipeline stage this error was raised in, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
