//! Embedding capability used to index endpoints and to embed queries.
//!
//! The same [`Embedder`] must be used at index-build time and at query time;
//! its [`Embedder::id`] is pinned in the persisted index manifest so that a
//! mismatched configuration refuses to load a stale index.

pub mod hashing;
pub mod onnx;

pub use hashing::HashingEmbedder;
pub use onnx::OnnxEmbedder;

use crate::error::PipelineError;

/// Text embedding function.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the embedding function (algorithm, model, dimension).
    fn id(&self) -> String;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a single text. Vectors are L2-normalised.
    fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;

    /// Embed several texts, preserving order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// L2-normalise a vector in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}
