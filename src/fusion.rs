//! Lexical/vector score mixing.

use tracing::debug;

use crate::{
    corpus_index::RetrievalHit,
    error::{Result, Stage},
    retrieval::RankingStage,
    scoring::{Bm25, lexical_tokens},
};

/// Default weight of the BM25 component.
pub const DEFAULT_ALPHA: f32 = 0.2;

/// Keeps the similarity normalization finite when every distance is zero.
const DISTANCE_EPSILON: f64 = 1e-9;

/// Mixed score of every hit, in hit order.
///
/// BM25 is computed with the hit texts as the whole corpus, so IDF reflects
/// only the passages being ranked. Vector similarity is rescaled as
/// `1 − d / (max d + ε)` before mixing:
///
/// ```text
/// mixed(i) = α · bm25(i) + (1 − α) · sim(i)
/// ```
pub fn fuse_scores(query: &str, hits: &[RetrievalHit], alpha: f32) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }

    let corpus: Vec<Vec<&str>> =
        hits.iter().map(|h| lexical_tokens(&h.text)).collect();
    let bm25 = Bm25::new(&corpus).scores(&lexical_tokens(query));

    let max_distance = hits
        .iter()
        .map(|h| f64::from(h.distance))
        .fold(0.0, f64::max);

    hits.iter()
        .zip(bm25)
        .map(|(hit, lexical)| {
            let sim =
                1.0 - f64::from(hit.distance) / (max_distance + DISTANCE_EPSILON);
            let alpha = f64::from(alpha);
            (alpha * f64::from(lexical) + (1.0 - alpha) * sim) as f32
        })
        .collect()
}

/// Re-sorts hits by [`fuse_scores`], descending. Equal scores keep their
/// incoming order.
#[derive(Debug, Clone, Copy)]
pub struct LexicalFusion {
    alpha: f32,
}

impl LexicalFusion {
    pub fn new(alpha: f32) -> Self {
        Self { alpha }
    }
}

impl RankingStage for LexicalFusion {
    fn stage(&self) -> Stage {
        Stage::Fusion
    }

    fn apply(
        &self,
        query: &str,
        hits: Vec<RetrievalHit>,
    ) -> Result<Vec<RetrievalHit>> {
        let mixed = fuse_scores(query, &hits, self.alpha);
        debug!(hits = hits.len(), alpha = self.alpha, "lexical fusion");
        Ok(sort_by_score_desc(hits, &mixed))
    }
}

/// Stable descending sort of `hits` by the parallel `scores` slice.
pub(crate) fn sort_by_score_desc(
    hits: Vec<RetrievalHit>,
    scores: &[f32],
) -> Vec<RetrievalHit> {
    let mut ranked: Vec<(f32, RetrievalHit)> =
        scores.iter().copied().zip(hits).collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.into_iter().map(|(_, hit)| hit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chunk_id::ChunkId, corpus_index::ChunkMetadata};

    fn hit(id: &str, text: &str, distance: f32) -> RetrievalHit {
        RetrievalHit {
            chunk_id: ChunkId::from_raw(id),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_path: format!("{id}.md"),
                chunk_index: 0,
            },
            distance,
        }
    }

    fn ids(hits: &[RetrievalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn empty_hits_stay_empty() {
        assert!(fuse_scores("q", &[], 0.5).is_empty());
        assert!(LexicalFusion::new(0.5).apply("q", Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn alpha_zero_keeps_distance_order() {
        let hits = vec![
            hit("a", "nothing relevant", 0.1),
            hit("b", "tokio runtime", 0.3),
            hit("c", "other words", 0.2),
        ];
        let out = LexicalFusion::new(0.0).apply("tokio runtime", hits).unwrap();
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn alpha_one_promotes_exact_terms() {
        let hits = vec![
            hit("a", "nothing relevant", 0.1),
            hit("b", "tokio runtime", 0.3),
            hit("c", "other words", 0.2),
        ];
        let out = LexicalFusion::new(1.0).apply("tokio runtime", hits).unwrap();
        assert_eq!(out[0].chunk_id.as_str(), "b");
    }

    #[test]
    fn equal_distances_do_not_divide_by_zero() {
        let hits = vec![hit("a", "x", 0.0), hit("b", "y", 0.0)];
        let scores = fuse_scores("z", &hits, 0.2);
        assert!(scores.iter().all(|s| s.is_finite()));
        assert_eq!(scores[0], scores[1]);
    }

    #[test]
    fn ties_keep_incoming_order() {
        let hits = vec![
            hit("first", "same text", 0.4),
            hit("second", "same text", 0.4),
        ];
        let out = LexicalFusion::new(0.5).apply("unrelated", hits).unwrap();
        assert_eq!(ids(&out), vec!["first", "second"]);
    }

    #[test]
    fn furthest_hit_has_near_zero_similarity() {
        let hits = vec![hit("a", "x", 0.5), hit("b", "y", 1.0)];
        let scores = fuse_scores("q", &hits, 0.0);
        assert!((scores[0] - 0.5).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
    }
}
