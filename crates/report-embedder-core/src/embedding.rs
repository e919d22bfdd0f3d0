//! Vectorizer trait and vector utilities.
//!
//! Defines the [`Vectorizer`] trait that all embedding backends implement,
//! plus pure helpers for vector serialization, normalization, input
//! truncation, and output validation.
//!
//! Concrete vectorizers (fastembed, tract, OpenAI, Ollama, hashing) live
//! in the `report-embedder` app crate.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::EmbedError;

/// A text-embedding model behind a batch interface.
///
/// `embed` returns one vector per input, in input order, each of
/// [`dims`](Vectorizer::dims) elements and L2-normalized. Over-length
/// inputs are truncated, never rejected. An `Err` fails the whole batch.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    /// Returns the model identifier (e.g. `"paraphrase-multilingual-mpnet-base-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Load model state before the first batch. The materializer calls
    /// this once per non-empty run; an error aborts the run.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Verify a vectorizer's output against its contract.
pub fn check_output(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            return Err(EmbedError::DimensionMismatch {
                index,
                expected: dims,
                got: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(EmbedError::NonFiniteValue { index });
        }
    }
    Ok(())
}

/// Cut `text` to at most `max_chars` characters (no marker).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Scale `v` to unit L2 norm. Near-zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use report_embedder_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
