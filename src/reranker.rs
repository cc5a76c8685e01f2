use std::sync::Arc;

use candle_core::Tensor;
use tracing::debug;

use crate::{
    corpus_index::RetrievalHit,
    embedding::{Embedder, embed_checked},
    error::{Error, Result, Stage},
    fusion::sort_by_score_desc,
    retrieval::RankingStage,
    scoring::dot,
};

/// Scores (query, passage) pairs; higher means more relevant.
///
/// Only the relative order of scores for one query is meaningful. All
/// passages for a query are scored in a single call.
pub trait PairwiseScorer: Send + Sync {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// A [`PairwiseScorer`] that compares single-vector embeddings.
///
/// The query and passages are embedded in one batch and scored by dot
/// product, so any [`Embedder`] can stand in when no late-interaction model is
/// loaded.
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl PairwiseScorer for EmbeddingScorer {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let mut texts = Vec::with_capacity(passages.len() + 1);
        texts.push(query.to_string());
        texts.extend_from_slice(passages);

        let vectors = embed_checked(self.embedder.as_ref(), &texts)?;
        let (query_vector, passage_vectors) = vectors.split_at(1);
        Ok(passage_vectors
            .iter()
            .map(|v| dot(&query_vector[0], v))
            .collect())
    }

    fn name(&self) -> &str {
        self.embedder.name()
    }
}

/// Rerank stage: reorders hits by a [`PairwiseScorer`], descending.
///
/// Never drops or adds hits. Equal scores keep their incoming order.
pub struct Rerank {
    scorer: Arc<dyn PairwiseScorer>,
}

impl Rerank {
    pub fn new(scorer: Arc<dyn PairwiseScorer>) -> Self {
        Self { scorer }
    }
}

impl RankingStage for Rerank {
    fn stage(&self) -> Stage {
        Stage::Rerank
    }

    fn apply(
        &self,
        query: &str,
        hits: Vec<RetrievalHit>,
    ) -> Result<Vec<RetrievalHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let texts: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
        let scores = self.scorer.score(query, &texts)?;
        if scores.len() != hits.len() {
            return Err(Error::capability(
                "scorer",
                format!(
                    "{} returned {} scores for {} passages",
                    self.scorer.name(),
                    scores.len(),
                    hits.len()
                ),
            ));
        }
        debug!(hits = hits.len(), scorer = self.scorer.name(), "rerank");

        Ok(sort_by_score_desc(hits, &scores))
    }
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
pub(crate) fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    let sim_matrix = query_embedding
        .matmul(&doc_embedding.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    // Best document token per query token.
    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    row_maxes
        .sum_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)
}

pub(crate) fn map_candle_err(e: candle_core::Error) -> Error {
    Error::capability("tensor", e)
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::{
        chunk_id::ChunkId,
        corpus_index::ChunkMetadata,
        embedding::HashingEmbedder,
    };

    fn make_tensor(data: &[f32], shape: (usize, usize)) -> Tensor {
        Tensor::from_vec(data.to_vec(), shape, &Device::Cpu).unwrap()
    }

    fn hit(id: &str, text: &str) -> RetrievalHit {
        RetrievalHit {
            chunk_id: ChunkId::from_raw(id),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_path: format!("{id}.md"),
                chunk_index: 0,
            },
            distance: 0.5,
        }
    }

    #[test]
    fn maxsim_identical_vectors() {
        let q = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let d = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let score = maxsim(&q, &d).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn maxsim_orthogonal_vectors() {
        let q = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let d = make_tensor(&[0.0, 1.0, 0.0], (1, 3));
        let score = maxsim(&q, &d).unwrap();
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn maxsim_multiple_query_tokens() {
        // Row maxes are [1.0, 1.0]: each query token has an exact match.
        let q = make_tensor(&[1.0, 0.0, 0.0, 1.0], (2, 2));
        let d = make_tensor(&[1.0, 0.0, 0.0, 1.0, 0.5, 0.5], (3, 2));
        let score = maxsim(&q, &d).unwrap();
        assert!((score - 2.0).abs() < 1e-6);
    }

    struct FixedScorer(Vec<f32>);

    impl PairwiseScorer for FixedScorer {
        fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn rerank_sorts_descending_with_stable_ties() {
        let stage = Rerank::new(Arc::new(FixedScorer(vec![0.1, 0.9, 0.1, 0.5])));
        let hits = vec![hit("a", "a"), hit("b", "b"), hit("c", "c"), hit("d", "d")];
        let out = stage.apply("q", hits).unwrap();
        let ids: Vec<_> = out.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn rerank_rejects_short_score_list() {
        let stage = Rerank::new(Arc::new(FixedScorer(vec![0.1])));
        let err = stage.apply("q", vec![hit("a", "a"), hit("b", "b")]).unwrap_err();
        assert!(matches!(err, Error::Capability { capability: "scorer", .. }));
    }

    #[test]
    fn embedding_scorer_prefers_shared_terms() {
        let scorer = EmbeddingScorer::new(Arc::new(HashingEmbedder::default()));
        let scores = scorer
            .score(
                "borrow checker",
                &["the borrow checker".to_string(), "sourdough starter".to_string()],
            )
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
