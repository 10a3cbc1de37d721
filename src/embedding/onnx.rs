//! ONNX bi-encoder embedder.
//!
//! Produces mean-pooled, L2-normalised sentence embeddings from any BERT-style
//! ONNX export (e.g. all-MiniLM-L6-v2 or bge-base). Endpoint descriptions and
//! queries are encoded independently, so endpoint vectors can be computed once
//! at index-build time.

use crate::embedding::{normalize, Embedder};
use crate::error::PipelineError;
use crossbeam::queue::ArrayQueue;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// A pool of ONNX sessions behind one tokenizer.
///
/// `Session::run` needs `&mut Session`, so each session sits behind its own
/// mutex. Idle session indices are kept in a lock-free queue; a caller takes
/// an idle one when available and otherwise queues on a round-robin pick.
pub struct OnnxEmbedder {
    sessions: Vec<Mutex<Session>>,
    available: ArrayQueue<usize>,
    next: AtomicUsize,
    tokenizer: Tokenizer,
    max_length: usize,
    embedding_dim: usize,
    model_id: String,
}

impl OnnxEmbedder {
    /// Load the model into `pool_size` sessions and probe its output dimension.
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        pool_size: usize,
    ) -> Result<Self, PipelineError> {
        let pool_size = pool_size.max(1);

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            PipelineError::EmbeddingFailure(format!("Failed to load tokenizer: {}", e))
        })?;

        // Read model file once
        let model_bytes = std::fs::read(model_path).map_err(|e| {
            PipelineError::EmbeddingFailure(format!("Failed to read model file: {}", e))
        })?;

        let digest = Sha256::digest(&model_bytes);
        let model_id = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

        let mut sessions = Vec::with_capacity(pool_size);
        let available = ArrayQueue::new(pool_size);

        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?
                .commit_from_memory(&model_bytes)
                .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;

            sessions.push(Mutex::new(session));
            available.push(i).map_err(|_| {
                PipelineError::EmbeddingFailure("Failed to initialize session pool".into())
            })?;
        }

        let mut embedder = Self {
            sessions,
            available,
            next: AtomicUsize::new(0),
            tokenizer,
            max_length,
            embedding_dim: 0,
            model_id,
        };

        // Probe the hidden size instead of assuming one per model family.
        let probe = embedder.encode_batch(&["dimension probe".to_string()])?;
        embedder.embedding_dim = probe.ncols();

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            max_length,
            pool_size,
            embedding_dim = embedder.embedding_dim,
            "ONNX embedder loaded"
        );

        Ok(embedder)
    }

    /// Encode a batch of texts into a (batch_size, embedding_dim) matrix.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Array2<f32>, PipelineError> {
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.embedding_dim)));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| PipelineError::EmbeddingFailure(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();

        // Find max length in this batch (capped at max_length)
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let shape = [batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;

        let (session_idx, pooled) = self.acquire_session();
        let result = (|| -> Result<Array2<f32>, PipelineError> {
            let mut session = self.sessions[session_idx]
                .lock()
                .map_err(|_| PipelineError::EmbeddingFailure("Session lock poisoned".into()))?;

            let outputs = session
                .run(ort::inputs![
                    "input_ids" => input_ids_tensor,
                    "attention_mask" => attention_mask_tensor,
                    "token_type_ids" => token_type_ids_tensor,
                ])
                .map_err(|e| PipelineError::EmbeddingFailure(format!("Inference failed: {}", e)))?;

            // (batch, seq_len, hidden_size)
            let hidden_state = outputs.get("last_hidden_state").ok_or_else(|| {
                PipelineError::EmbeddingFailure("No 'last_hidden_state' output found".into())
            })?;

            let (shape_info, data) = hidden_state
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;

            let hidden_size = shape_info[2] as usize;
            Ok(mean_pool(data, &attention_mask, batch_size, max_len, hidden_size))
        })();
        if pooled {
            self.release_session(session_idx);
        }

        result
    }

    /// Returns the session index and whether it was taken from the idle queue.
    fn acquire_session(&self) -> (usize, bool) {
        match self.available.pop() {
            Some(idx) => (idx, true),
            None => (
                self.next.fetch_add(1, Ordering::Relaxed) % self.sessions.len(),
                false,
            ),
        }
    }

    fn release_session(&self, index: usize) {
        // Only indices popped from the queue come back, so this never overflows.
        let _ = self.available.push(index);
    }
}

/// Mean pooling over unmasked tokens, followed by L2 normalisation.
fn mean_pool(
    data: &[f32],
    attention_mask: &[i64],
    batch_size: usize,
    max_len: usize,
    hidden_size: usize,
) -> Array2<f32> {
    let mut embeddings = Array2::zeros((batch_size, hidden_size));

    for i in 0..batch_size {
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0.0f32;

        for j in 0..max_len {
            if attention_mask[i * max_len + j] == 1 {
                let base_idx = i * max_len * hidden_size + j * hidden_size;
                for (k, sum_val) in sum.iter_mut().enumerate() {
                    *sum_val += data[base_idx + k];
                }
                count += 1.0;
            }
        }

        if count > 0.0 {
            for val in sum.iter_mut() {
                *val /= count;
            }
        }
        normalize(&mut sum);

        for (k, val) in sum.into_iter().enumerate() {
            embeddings[[i, k]] = val;
        }
    }

    embeddings
}

impl Embedder for OnnxEmbedder {
    fn id(&self) -> String {
        format!("onnx-meanpool:{}:{}", self.model_id, self.embedding_dim)
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let embeddings = self.encode_batch(&[text.to_string()])?;
        Ok(embeddings.row(0).to_vec())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let embeddings = self.encode_batch(texts)?;
        Ok(embeddings.outer_iter().map(|row| row.to_vec()).collect())
    }
}
