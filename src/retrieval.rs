//! The retrieval pipeline: candidate fetch, then a fixed chain of optional
//! ranking stages, then top-k truncation.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    context::{AssembledContext, assemble},
    corpus_index::{CorpusIndex, RetrievalHit},
    diversity::{DEFAULT_LAMBDA, Diversify},
    embedding::{Embedder, embed_checked},
    error::{Error, Result, Stage},
    fusion::{DEFAULT_ALPHA, LexicalFusion},
    reranker::{PairwiseScorer, Rerank},
};

pub const DEFAULT_TOP_K: usize = 6;

/// How many candidates to fetch per result slot when diversity is on.
const DIVERSITY_POOL_FACTOR: usize = 3;

/// Per-request retrieval settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub use_diversity: bool,
    pub diversity_lambda: f32,
    pub use_lexical_fusion: bool,
    pub fusion_alpha: f32,
    pub use_rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_TOP_K,
            use_diversity: false,
            diversity_lambda: DEFAULT_LAMBDA,
            use_lexical_fusion: false,
            fusion_alpha: DEFAULT_ALPHA,
            use_rerank: false,
        }
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::Config("k must be positive".to_string()));
        }
        check_unit_interval("diversity_lambda", self.diversity_lambda)?;
        check_unit_interval("fusion_alpha", self.fusion_alpha)
    }

    /// Number of nearest neighbors to request from the index.
    ///
    /// ```
    /// use docrag::RetrievalConfig;
    ///
    /// let mut config = RetrievalConfig { k: 4, ..Default::default() };
    /// assert_eq!(config.candidate_count(), 4);
    /// config.use_diversity = true;
    /// assert_eq!(config.candidate_count(), 12);
    /// ```
    pub fn candidate_count(&self) -> usize {
        if self.use_diversity {
            self.k.saturating_mul(DIVERSITY_POOL_FACTOR).max(self.k)
        } else {
            self.k
        }
    }
}

/// One step of the ranking chain: takes the current ordered hits and returns
/// a new order.
pub trait RankingStage: Send + Sync {
    /// The stage named in errors raised by [`RankingStage::apply`].
    fn stage(&self) -> Stage;

    fn apply(&self, query: &str, hits: Vec<RetrievalHit>)
    -> Result<Vec<RetrievalHit>>;
}

/// Plain ascending-distance order, used in place of diversity selection
/// when that stage is off.
#[derive(Debug, Clone, Copy)]
pub struct DistanceOrder {
    k: usize,
}

impl DistanceOrder {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl RankingStage for DistanceOrder {
    fn stage(&self) -> Stage {
        Stage::Diversity
    }

    fn apply(
        &self,
        _query: &str,
        mut hits: Vec<RetrievalHit>,
    ) -> Result<Vec<RetrievalHit>> {
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(self.k);
        Ok(hits)
    }
}

/// Runs queries against a corpus index.
///
/// Capabilities are passed in once at construction and shared across
/// requests. A retriever holds no per-request state, so one instance can
/// serve concurrent queries.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn CorpusIndex>,
    scorer: Option<Arc<dyn PairwiseScorer>>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn CorpusIndex>) -> Self {
        Self {
            embedder,
            index,
            scorer: None,
        }
    }

    /// Attach the scorer used when `use_rerank` is set.
    pub fn with_scorer(mut self, scorer: Arc<dyn PairwiseScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// The stages `config` enables, in pipeline order.
    pub fn stages(&self, config: &RetrievalConfig) -> Result<Vec<Box<dyn RankingStage>>> {
        let mut stages: Vec<Box<dyn RankingStage>> = Vec::with_capacity(3);

        if config.use_diversity {
            stages.push(Box::new(Diversify::new(
                Arc::clone(&self.embedder),
                config.k,
                config.diversity_lambda,
            )));
        } else {
            stages.push(Box::new(DistanceOrder::new(config.k)));
        }

        if config.use_lexical_fusion {
            stages.push(Box::new(LexicalFusion::new(config.fusion_alpha)));
        }

        if config.use_rerank {
            let scorer = self.scorer.as_ref().ok_or_else(|| {
                Error::Config("rerank requested but no scorer is configured".to_string())
            })?;
            stages.push(Box::new(Rerank::new(Arc::clone(scorer))));
        }

        Ok(stages)
    }

    /// Embed the query and fetch nearest-neighbor candidates, ascending by
    /// distance.
    fn fetch_candidates(
        &self,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievalHit>> {
        let vectors = embed_checked(self.embedder.as_ref(), &[query.to_string()])?;
        let Some(vector) = vectors.into_iter().next() else {
            return Err(Error::capability("embedder", "no vector for the query"));
        };

        let candidate_count = config.candidate_count();
        let mut hits = self.index.query(&vector, candidate_count)?;
        hits.truncate(candidate_count);
        Ok(hits)
    }

    /// Return up to `config.k` ranked hits for `query`.
    ///
    /// The configuration is validated before any capability is called. Any
    /// capability failure aborts the request with an error naming the stage
    /// that was running; no stage is skipped as a fallback.
    pub fn retrieve(
        &self,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievalHit>> {
        config.validate()?;
        let stages = self.stages(config)?;

        let mut hits = self
            .fetch_candidates(query, config)
            .map_err(|e| e.at_stage(Stage::Fetch))?;
        debug!(
            candidates = hits.len(),
            requested = config.candidate_count(),
            "fetched candidates"
        );

        for stage in &stages {
            hits = stage
                .apply(query, hits)
                .map_err(|e| e.at_stage(stage.stage()))?;
            debug!(stage = %stage.stage(), hits = hits.len(), "stage complete");
        }

        hits.truncate(config.k);
        info!(results = hits.len(), k = config.k, "retrieval complete");
        Ok(hits)
    }

    /// [`Retriever::retrieve`] followed by context assembly.
    pub fn retrieve_context(
        &self,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<AssembledContext> {
        let hits = self.retrieve(query, config)?;
        Ok(assemble(query, &hits))
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.name())
            .field("scorer", &self.scorer.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk_id::ChunkId,
        corpus_index::{ChunkMetadata, IndexEntry, MemoryIndex},
        embedding::HashingEmbedder,
    };

    #[test]
    fn default_config_is_valid() {
        let config = RetrievalConfig::default();
        assert_eq!(config.k, 6);
        assert_eq!(config.diversity_lambda, 0.75);
        assert_eq!(config.fusion_alpha, 0.2);
        config.validate().unwrap();
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = [
            RetrievalConfig { k: 0, ..Default::default() },
            RetrievalConfig { diversity_lambda: 1.5, ..Default::default() },
            RetrievalConfig { diversity_lambda: -0.1, ..Default::default() },
            RetrievalConfig { fusion_alpha: f32::NAN, ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().unwrap_err().is_config(), "{config:?}");
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RetrievalConfig =
            serde_json::from_str(r#"{"k": 3, "use_diversity": true}"#).unwrap();
        assert_eq!(config.k, 3);
        assert!(config.use_diversity);
        assert_eq!(config.fusion_alpha, DEFAULT_ALPHA);
    }

    #[test]
    fn candidate_count_never_below_k() {
        let config = RetrievalConfig {
            k: usize::MAX,
            use_diversity: true,
            ..Default::default()
        };
        assert_eq!(config.candidate_count(), usize::MAX);
    }

    #[test]
    fn stage_chain_follows_config() {
        let retriever = Retriever::new(
            Arc::new(HashingEmbedder::default()),
            Arc::new(MemoryIndex::new()),
        );
        let config = RetrievalConfig {
            use_diversity: true,
            use_lexical_fusion: true,
            ..Default::default()
        };
        let names: Vec<Stage> = retriever
            .stages(&config)
            .unwrap()
            .iter()
            .map(|s| s.stage())
            .collect();
        assert_eq!(names, vec![Stage::Diversity, Stage::Fusion]);

        let rerank = RetrievalConfig { use_rerank: true, ..Default::default() };
        assert!(retriever.stages(&rerank).err().unwrap().is_config());
    }

    #[test]
    fn retrieves_most_similar_passage() {
        let embedder = Arc::new(HashingEmbedder::default());
        let index = Arc::new(MemoryIndex::new());
        let texts = ["rust borrow checker", "baking sourdough bread", "tidal pools"];
        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .unwrap();
        let entries: Vec<IndexEntry> = texts
            .iter()
            .zip(vectors)
            .map(|(text, embedding)| IndexEntry {
                chunk_id: ChunkId::new("notes.md", 0, text),
                embedding,
                metadata: ChunkMetadata {
                    source_path: "notes.md".to_string(),
                    chunk_index: 0,
                },
                text: text.to_string(),
            })
            .collect();
        index.upsert(&entries).unwrap();

        let retriever = Retriever::new(embedder, index);
        let config = RetrievalConfig { k: 1, ..Default::default() };
        let hits = retriever.retrieve("sourdough bread", &config).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "baking sourdough bread");
    }
}
