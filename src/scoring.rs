//! Similarity and lexical scoring primitives shared by the pipeline stages.

use std::collections::HashMap;

/// Term-frequency saturation.
pub const BM25_K1: f32 = 1.5;
/// Document-length normalization strength.
pub const BM25_B: f32 = 0.75;
/// Floor applied to negative IDFs, as a fraction of the mean IDF.
pub const BM25_EPSILON: f32 = 0.25;

/// Dot product of two equal-length vectors.
///
/// For unit vectors this is their cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal length");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine distance between two unit vectors, clamped to `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - dot(a, b)).clamp(0.0, 2.0)
}

/// Split text on whitespace for lexical scoring. No stemming or case folding.
pub fn lexical_tokens(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Okapi BM25 over a small in-memory corpus.
///
/// IDF is `ln(N - n + 0.5) - ln(n + 0.5)`; terms whose IDF comes out negative
/// (present in more than half the corpus) get `BM25_EPSILON` times the mean
/// IDF instead.
#[derive(Debug, Clone)]
pub struct Bm25 {
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f32,
    idf: HashMap<String, f32>,
}

impl Bm25 {
    pub fn new<S: AsRef<str>>(corpus: &[Vec<S>]) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for term in doc {
                *freqs.entry(term.as_ref().to_string()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(doc.len());
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if corpus.is_empty() {
            0.0
        } else {
            total_len as f32 / corpus.len() as f32
        };

        let n = corpus.len() as f32;
        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, count) in containing {
            let count = count as f32;
            let value = (n - count + 0.5).ln() - (count + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = BM25_EPSILON * idf_sum / idf.len() as f32;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            doc_freqs,
            doc_lens,
            avg_doc_len,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Score every corpus document against `query`, in corpus order.
    ///
    /// Repeated query terms contribute once per occurrence.
    pub fn scores<S: AsRef<str>>(&self, query: &[S]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];
        for term in query {
            let term = term.as_ref();
            let Some(&idf) = self.idf.get(term) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let len_ratio = if self.avg_doc_len > 0.0 {
                    self.doc_lens[i] as f32 / self.avg_doc_len
                } else {
                    0.0
                };
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len_ratio);
                scores[i] += idf * (tf * (BM25_K1 + 1.0)) / (tf + norm);
            }
        }
        scores
    }
}
