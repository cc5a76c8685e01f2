//! Choosing and constructing the embedding/scoring capabilities.

use std::{fmt, str::FromStr, sync::Arc};

use tracing::warn;

use crate::{
    config_db::{ConfigDb, EMBEDDER_KEY, MODEL_KEY},
    embedding::{Embedder, HashingEmbedder},
    error::Result,
    model_manager::{ColbertModel, DEFAULT_MODEL_ID},
    reranker::{EmbeddingScorer, PairwiseScorer},
};

/// Which embedder family produced (or will produce) the index vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// ColBERT token embeddings, mean-pooled; MaxSim for reranking.
    #[default]
    Colbert,
    /// Offline feature hashing.
    Hashing,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Colbert => "colbert",
            Backend::Hashing => "hashing",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Backend::Colbert),
            "hashing" => Ok(Backend::Hashing),
            other => Err(format!(
                "unknown embedder backend {other:?} (expected colbert or hashing)"
            )),
        }
    }
}

/// Backend and model after combining the request with stored settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendChoice {
    pub backend: Backend,
    pub model_id: String,
}

/// Resolve backend and model: explicit value (flag or environment) first,
/// then the settings recorded at ingest time, then the defaults.
///
/// Warns when an explicit choice differs from what built the index, since
/// query vectors would not be comparable to the stored ones.
pub fn resolve(
    config_db: &ConfigDb,
    backend: Option<Backend>,
    model_id: Option<&str>,
) -> Result<BackendChoice> {
    let stored_backend = config_db
        .get_setting(EMBEDDER_KEY)?
        .and_then(|s| s.parse::<Backend>().ok());
    let stored_model = config_db.get_setting(MODEL_KEY)?;

    if let (Some(requested), Some(stored)) = (backend, stored_backend)
        && requested != stored
    {
        warn!(%requested, %stored, "index was built with a different embedder");
    }

    let backend = backend.or(stored_backend).unwrap_or_default();
    let model_id = match (model_id, stored_model) {
        (Some(requested), Some(stored)) => {
            if backend == Backend::Colbert && requested != stored {
                warn!(requested, stored = %stored, "index was built with a different model");
            }
            requested.to_string()
        }
        (Some(requested), None) => requested.to_string(),
        (None, Some(stored)) => stored,
        (None, None) => DEFAULT_MODEL_ID.to_string(),
    };

    Ok(BackendChoice { backend, model_id })
}

/// Record the choice used to build the index.
pub fn store(config_db: &ConfigDb, choice: &BackendChoice) -> Result<()> {
    config_db.set_setting(EMBEDDER_KEY, choice.backend.as_str())?;
    config_db.set_setting(MODEL_KEY, &choice.model_id)
}

/// Long-lived capability objects shared by ingestion and retrieval.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub scorer: Arc<dyn PairwiseScorer>,
}

impl Capabilities {
    /// Build the capabilities for `choice`. Models load lazily on first use.
    pub fn load(choice: &BackendChoice) -> Self {
        match choice.backend {
            Backend::Colbert => {
                let model = Arc::new(ColbertModel::new(choice.model_id.clone()));
                Self {
                    embedder: model.clone(),
                    scorer: model,
                }
            }
            Backend::Hashing => {
                let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
                Self {
                    scorer: Arc::new(EmbeddingScorer::new(embedder.clone())),
                    embedder,
                }
            }
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("embedder", &self.embedder.name())
            .field("scorer", &self.scorer.name())
            .finish()
    }
}
