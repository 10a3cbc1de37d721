//! Generative text capability used by the synthesizer and the summarizer.

pub mod ollama;

pub use ollama::OllamaGenerator;

use crate::error::PipelineError;
use async_trait::async_trait;

/// Opaque `generate(prompt) -> text` function.
///
/// Output shape is requested by the prompt but never guaranteed; callers parse
/// and validate whatever comes back. Transport failures are reported as
/// `GenerationUnavailable`, timeouts as `Timeout`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;

    /// Model identifier, for logs.
    fn model(&self) -> &str;
}
