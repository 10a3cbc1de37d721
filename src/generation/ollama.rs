use crate::error::{snippet, PipelineError};
use crate::generation::Generator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Generator backed by an Ollama server's non-streaming `/api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PipelineError::GenerationUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.base_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout
                } else {
                    PipelineError::GenerationUnavailable(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::GenerationUnavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet(&body, 200)
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Timeout
            } else {
                PipelineError::GenerationUnavailable(format!("Invalid response body: {}", e))
            }
        })?;

        tracing::debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            response_chars = parsed.response.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generation completed"
        );

        Ok(parsed.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
