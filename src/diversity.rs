//! Maximal marginal relevance (MMR) re-selection.
//!
//! Greedily picks passages that are relevant to the query but not redundant
//! with what has already been picked:
//!
//! ```text
//! score(i) = λ · (1 − distance(i)) − (1 − λ) · max_{j ∈ selected} dot(e_i, e_j)
//! ```
//!
//! The first pick is always the closest candidate. Ties go to the candidate
//! that came first in the input order.

use std::sync::Arc;

use tracing::debug;

use crate::{
    corpus_index::RetrievalHit,
    embedding::{Embedder, embed_checked},
    error::{Error, Result, Stage},
    retrieval::RankingStage,
    scoring::dot,
};

/// Default relevance weight.
pub const DEFAULT_LAMBDA: f32 = 0.75;

/// Return the indices of up to `k` candidates in MMR selection order.
///
/// `distances[i]` is the query distance of candidate `i` and `embeddings[i]`
/// its unit-length vector.
///
/// # Examples
///
/// ```
/// use docrag::diversity::mmr_select;
///
/// // Candidates 0 and 1 are near-duplicates; 2 is different but a bit
/// // further from the query.
/// let distances = [0.10, 0.12, 0.20];
/// let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
/// assert_eq!(mmr_select(&distances, &embeddings, 2, 0.5), vec![0, 2]);
/// assert_eq!(mmr_select(&distances, &embeddings, 2, 1.0), vec![0, 1]);
/// ```
pub fn mmr_select(
    distances: &[f32],
    embeddings: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let n = distances.len().min(embeddings.len());
    let target = k.min(n);
    let mut selected = Vec::with_capacity(target);
    let mut taken = vec![false; n];
    // Highest similarity of each candidate to anything selected so far.
    let mut redundancy = vec![f32::NEG_INFINITY; n];

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;
        for i in 0..n {
            if taken[i] {
                continue;
            }
            let score = if selected.is_empty() {
                -distances[i]
            } else {
                lambda * (1.0 - distances[i]) - (1.0 - lambda) * redundancy[i]
            };
            if best.is_none_or(|(_, s)| score.total_cmp(&s).is_gt()) {
                best = Some((i, score));
            }
        }

        let Some((pick, _)) = best else {
            break;
        };
        taken[pick] = true;
        selected.push(pick);

        for i in 0..n {
            if !taken[i] {
                redundancy[i] =
                    redundancy[i].max(dot(&embeddings[i], &embeddings[pick]));
            }
        }
    }

    selected
}

/// Diversity stage: embeds the candidate texts in one batch and keeps the
/// `k` passages chosen by [`mmr_select`], in selection order.
pub struct Diversify {
    embedder: Arc<dyn Embedder>,
    k: usize,
    lambda: f32,
}

impl Diversify {
    pub fn new(embedder: Arc<dyn Embedder>, k: usize, lambda: f32) -> Self {
        Self {
            embedder,
            k,
            lambda,
        }
    }
}

impl RankingStage for Diversify {
    fn stage(&self) -> Stage {
        Stage::Diversity
    }

    fn apply(
        &self,
        _query: &str,
        hits: Vec<RetrievalHit>,
    ) -> Result<Vec<RetrievalHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let texts: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
        let embeddings = embed_checked(self.embedder.as_ref(), &texts)?;
        let distances: Vec<f32> = hits.iter().map(|h| h.distance).collect();

        let order = mmr_select(&distances, &embeddings, self.k, self.lambda);
        if order.len() != self.k.min(hits.len()) {
            return Err(Error::capability(
                "embedder",
                "candidate embeddings did not cover every candidate",
            ));
        }
        debug!(
            candidates = hits.len(),
            selected = order.len(),
            lambda = self.lambda,
            "diversity selection"
        );

        let mut slots: Vec<Option<RetrievalHit>> =
            hits.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}
