use std::sync::{Mutex, MutexGuard};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    reranker::{PairwiseScorer, map_candle_err, maxsim},
    scoring::l2_normalize,
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";

/// Token rows with a smaller norm are treated as padding when pooling.
const PADDING_NORM: f32 = 1e-6;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn colbert_err(e: impl std::fmt::Display) -> Error {
    Error::capability("colbert", e)
}

struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                info!(model = %self.model_id, "loading ColBERT model");
                ColBERT::from(&self.model_id)
                    .with_device(default_device())
                    .try_into()
                    .map_err(colbert_err)?
            }
        };
        Ok(self.model.insert(model))
    }

    fn encode(&mut self, texts: &[String], is_query: bool) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        model.encode(texts, is_query).map_err(colbert_err)
    }
}

/// A lazily-loaded ColBERT model serving as both embedder and scorer.
///
/// As an [`Embedder`] it mean-pools the token vectors of each passage into a
/// single unit vector. As a [`PairwiseScorer`] it keeps the token vectors and
/// scores with MaxSim late interaction.
///
/// The model is loaded on first use. Calls are serialized on an internal
/// mutex since encoding needs exclusive access to the model.
pub struct ColbertModel {
    inner: Mutex<ModelManager>,
    model_id: String,
}

impl ColbertModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            inner: Mutex::new(ModelManager {
                model: None,
                model_id: model_id.clone(),
            }),
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.lock().map(|m| m.model.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ModelManager>> {
        self.inner
            .lock()
            .map_err(|_| colbert_err("model lock poisoned"))
    }

    /// Token-level embeddings, `[B, T, D]`.
    fn encode(&self, texts: &[String], is_query: bool) -> Result<Tensor> {
        self.lock()?.encode(texts, is_query)
    }
}

impl Default for ColbertModel {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID)
    }
}

/// Average the non-padding rows of a `[T, D]` matrix and normalize.
///
/// A matrix made only of padding rows has no direction to normalize and is
/// an error.
fn mean_pool(tokens: &[Vec<f32>]) -> Result<Vec<f32>> {
    let dim = tokens.first().map_or(0, Vec::len);
    let mut pooled = vec![0f32; dim];
    let mut count = 0usize;
    for row in tokens {
        if row.iter().map(|x| x * x).sum::<f32>().sqrt() <= PADDING_NORM {
            continue;
        }
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
        count += 1;
    }
    if count == 0 {
        return Err(colbert_err("no non-padding token embeddings to pool"));
    }
    for x in &mut pooled {
        *x /= count as f32;
    }
    l2_normalize(&mut pooled);
    Ok(pooled)
}

impl Embedder for ColbertModel {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.encode(texts, false)?;
        let tokens = embeddings.to_vec3::<f32>().map_err(map_candle_err)?;
        debug!(texts = texts.len(), "pooled ColBERT embeddings");
        tokens.par_iter().map(|t| mean_pool(t)).collect()
    }

    fn name(&self) -> &str {
        "colbert"
    }
}

impl PairwiseScorer for ColbertModel {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        // [1, Q, D] -> [Q, D]
        let query_embedding = self
            .encode(&[query.to_string()], true)?
            .squeeze(0)
            .map_err(map_candle_err)?;
        let documents = self.encode(passages, false)?;

        (0..passages.len())
            .into_par_iter()
            .map(|i| {
                let doc = documents.get(i).map_err(map_candle_err)?;
                maxsim(&query_embedding, &doc)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "colbert"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let model = ColbertModel::new("custom/model");
        assert_eq!(model.model_id(), "custom/model");
        assert!(!model.is_loaded());
    }

    #[test]
    fn default_model_not_loaded() {
        let model = ColbertModel::default();
        assert!(!model.is_loaded());
        assert_eq!(model.model_id(), DEFAULT_MODEL_ID);
    }

    #[test]
    fn empty_batches_do_not_load_the_model() {
        let model = ColbertModel::new("missing/model");
        assert!(Embedder::embed(&model, &[]).unwrap().is_empty());
        assert!(model.score("q", &[]).unwrap().is_empty());
        assert!(!model.is_loaded());
    }

    #[test]
    fn mean_pool_skips_padding_rows() {
        let pooled =
            mean_pool(&[vec![3.0, 4.0], vec![0.0, 0.0], vec![3.0, 4.0]]).unwrap();
        assert!((pooled[0] - 0.6).abs() < 1e-6);
        assert!((pooled[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_of_padding_only_is_an_error() {
        let err = mean_pool(&[vec![0.0, 0.0], vec![0.0, 1e-7]]).unwrap_err();
        assert!(matches!(err, Error::Capability { capability: "colbert", .. }));
        assert!(mean_pool(&[]).is_err());
    }
}
