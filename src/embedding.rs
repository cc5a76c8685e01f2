//! The embedding capability and an offline hashing implementation.

use crate::{
    error::{Error, Result},
    scoring::{l2_norm, l2_normalize},
};

/// Default dimension of [`HashingEmbedder`] vectors.
pub const DEFAULT_HASHING_DIM: usize = 384;

/// Converts text into fixed-dimension unit vectors.
///
/// Implementations return one vector per input, in input order. A batched
/// call must produce the same vectors as calling once per text.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Short name for logs and stored settings.
    fn name(&self) -> &str;
}

/// Embed `texts` and verify the response shape.
///
/// A response with the wrong number of vectors, with vectors of differing
/// length, or with a zero or non-finite vector is reported as a capability
/// error.
pub fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(Error::capability(
            "embedder",
            format!(
                "{} returned {} vectors for {} texts",
                embedder.name(),
                vectors.len(),
                texts.len()
            ),
        ));
    }

    let dim = vectors[0].len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return Err(Error::capability(
            "embedder",
            format!("{} returned vectors of inconsistent dimension", embedder.name()),
        ));
    }

    if let Some(i) = vectors.iter().position(|v| {
        let norm = l2_norm(v);
        !norm.is_finite() || norm <= 1e-6
    }) {
        return Err(Error::capability(
            "embedder",
            format!("{} returned a degenerate vector for text {i}", embedder.name()),
        ));
    }

    Ok(vectors)
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercased whitespace token is hashed into one of `dim` buckets with a
/// hash-derived sign, and the bucket counts are L2-normalized. Texts that share
/// words land close together, which is enough for offline use and tests.
///
/// # Examples
///
/// ```
/// use docrag::embedding::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64);
/// let vectors = embedder.embed(&["hello world".to_string()]).unwrap();
/// let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
/// assert!((norm - 1.0).abs() < 1e-5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket =
                u64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4],
                    bytes[5], bytes[6], bytes[7],
                ]) as usize
                    % self.dim;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        if v.iter().all(|x| *x == 0.0) {
            // Empty text (or perfectly cancelling tokens) still needs a unit
            // vector.
            v[0] = 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{dot, l2_norm};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn vectors_are_unit_and_deterministic() {
        let embedder = HashingEmbedder::default();
        let out = embedder
            .embed(&texts(&["hello world", "hello world", ""]))
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), DEFAULT_HASHING_DIM);
        assert_eq!(out[0], out[1]);
        for v in &out {
            assert!((l2_norm(v) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn batched_equals_sequential() {
        let embedder = HashingEmbedder::new(32);
        let batch = embedder.embed(&texts(&["a b", "c d e"])).unwrap();
        let one = embedder.embed(&texts(&["a b"])).unwrap();
        let two = embedder.embed(&texts(&["c d e"])).unwrap();
        assert_eq!(batch, vec![one[0].clone(), two[0].clone()]);
    }

    #[test]
    fn shared_words_are_closer() {
        let embedder = HashingEmbedder::default();
        let out = embedder
            .embed(&texts(&[
                "rust memory safety",
                "rust memory model",
                "banana bread recipe",
            ]))
            .unwrap();
        assert!(dot(&out[0], &out[1]) > dot(&out[0], &out[2]));
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    #[test]
    fn embed_checked_rejects_wrong_count() {
        let err = embed_checked(&ShortEmbedder, &texts(&["a", "b"])).unwrap_err();
        assert!(matches!(err, Error::Capability { capability: "embedder", .. }));
    }

    struct ZeroEmbedder;

    impl Embedder for ZeroEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }

        fn name(&self) -> &str {
            "zero"
        }
    }

    #[test]
    fn embed_checked_rejects_zero_vectors() {
        let err = embed_checked(&ZeroEmbedder, &texts(&["a"])).unwrap_err();
        assert!(matches!(err, Error::Capability { capability: "embedder", .. }));
    }

    #[test]
    fn embed_checked_skips_empty_batches() {
        assert!(embed_checked(&ShortEmbedder, &[]).unwrap().is_empty());
    }
}
