//! Lexical feature-hashing embedder.
//!
//! Each token is hashed into one of `dimension` buckets; the bucket counts
//! form the vector. Needs no model files and is fully deterministic, which
//! makes it the default for small API descriptions and for tests.

use crate::embedding::{normalize, Embedder};
use crate::error::PipelineError;
use sha2::{Digest, Sha256};

/// Bump when tokenisation or bucketing changes so persisted indexes are rebuilt.
const HASHING_VERSION: u32 = 1;

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("hashing-v{}:{}", HASHING_VERSION, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Lowercased alphanumeric tokens of length >= 2, with naive plural folding
/// ("clients" -> "client", but "address" stays).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| {
            let lower = t.to_lowercase();
            if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
                lower[..lower.len() - 1].to_string()
            } else {
                lower
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_tokenize_folds_plurals_and_case() {
        assert_eq!(
            tokenize("List all Clients!"),
            vec!["list", "all", "client"]
        );
        assert_eq!(tokenize("address"), vec!["address"]);
        assert_eq!(tokenize("what's up"), vec!["what", "up"]);
    }

    #[test]
    fn test_embed_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("retrieve client records").unwrap();
        let b = embedder.embed("retrieve client records").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("list all active clients").unwrap();
        let related = embedder
            .embed("Retrieve a list of all client engagement records.")
            .unwrap();
        let unrelated = embedder.embed("Upload a weather forecast image").unwrap();

        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_yields_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert_eq!(embedder.embed("?!").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn test_id_pins_dimension() {
        assert_ne!(HashingEmbedder::new(8).id(), HashingEmbedder::new(16).id());
    }
}
