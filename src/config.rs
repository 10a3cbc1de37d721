use crate::pipeline::PipelineSettings;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which embedding backend builds and queries the endpoint index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Deterministic feature hashing. No model files needed.
    Hashing,
    /// ONNX bi-encoder with mean pooling.
    Onnx,
}

impl EmbedderKind {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "hashing" | "hash" => Ok(Self::Hashing),
            "onnx" | "bi-encoder" => Ok(Self::Onnx),
            other => anyhow::bail!("Unknown EMBEDDER '{}' (expected 'hashing' or 'onnx')", other),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Where the OpenAPI document is fetched from at startup.
    pub spec_url: String,
    /// Base URL every synthesized call is sent to.
    pub target_base_url: String,
    pub index_path: PathBuf,
    /// Rebuild the index even when the persisted one matches.
    pub rebuild_index: bool,
    pub embedder: EmbedderKind,
    pub hashing_dimension: usize,
    pub embedding_model_path: PathBuf,
    pub embedding_tokenizer_path: PathBuf,
    pub embedding_max_length: usize,
    /// Optional override for the ONNX session pool size. If None, uses available cores.
    pub embedding_pool_size: Option<usize>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub top_k: usize,
    /// Minimum retrieval score. If None, no hit is filtered out.
    pub score_threshold: Option<f32>,
    pub spec_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    pub max_summary_input_chars: usize,
    /// Semaphore permits for in-flight queries.
    pub max_concurrent_queries: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            spec_url: "http://127.0.0.1:8000/openapi.json".to_string(),
            target_base_url: "http://127.0.0.1:8000".to_string(),
            index_path: PathBuf::from(".callsmith/index.bin"),
            rebuild_index: false,
            embedder: EmbedderKind::Hashing,
            hashing_dimension: 512,
            embedding_model_path: PathBuf::from("./embedding-model/model.onnx"),
            embedding_tokenizer_path: PathBuf::from("./embedding-model/tokenizer.json"),
            embedding_max_length: 512,
            embedding_pool_size: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            top_k: 3,
            score_threshold: None,
            spec_timeout_secs: 30,
            generation_timeout_secs: 60,
            execution_timeout_secs: 30,
            embedding_timeout_secs: 10,
            max_summary_input_chars: 4000,
            max_concurrent_queries: 16,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let score_threshold = match env::var("SCORE_THRESHOLD") {
            Ok(s) if !s.trim().is_empty() => {
                let t: f32 = s.trim().parse()?;
                anyhow::ensure!((0.0..=1.0).contains(&t), "SCORE_THRESHOLD must be in [0, 1]");
                Some(t)
            }
            _ => None,
        };

        let top_k: usize = parse_or("TOP_K", defaults.top_k)?;
        anyhow::ensure!(top_k > 0, "TOP_K must be at least 1");

        let max_concurrent_queries: usize =
            parse_or("MAX_CONCURRENT_QUERIES", defaults.max_concurrent_queries)?;
        anyhow::ensure!(max_concurrent_queries > 0, "MAX_CONCURRENT_QUERIES must be at least 1");

        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", defaults.port)?,
            spec_url: env::var("SPEC_URL").unwrap_or(defaults.spec_url),
            target_base_url: env::var("TARGET_BASE_URL").unwrap_or(defaults.target_base_url),
            index_path: env::var("INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_path),
            rebuild_index: env::var("REBUILD_INDEX")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.rebuild_index),
            embedder: match env::var("EMBEDDER") {
                Ok(v) => EmbedderKind::parse(&v)?,
                Err(_) => defaults.embedder,
            },
            hashing_dimension: parse_or("HASHING_DIMENSION", defaults.hashing_dimension)?,
            embedding_model_path: env::var("EMBEDDING_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.embedding_model_path),
            embedding_tokenizer_path: env::var("EMBEDDING_TOKENIZER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.embedding_tokenizer_path),
            embedding_max_length: parse_or("EMBEDDING_MAX_LENGTH", defaults.embedding_max_length)?,
            embedding_pool_size: env::var("EMBEDDING_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok()),
            ollama_url: env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            top_k,
            score_threshold,
            spec_timeout_secs: parse_or("SPEC_TIMEOUT_SECS", defaults.spec_timeout_secs)?,
            generation_timeout_secs: parse_or(
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            )?,
            execution_timeout_secs: parse_or(
                "EXECUTION_TIMEOUT_SECS",
                defaults.execution_timeout_secs,
            )?,
            embedding_timeout_secs: parse_or(
                "EMBEDDING_TIMEOUT_SECS",
                defaults.embedding_timeout_secs,
            )?,
            max_summary_input_chars: parse_or(
                "MAX_SUMMARY_INPUT_CHARS",
                defaults.max_summary_input_chars,
            )?,
            max_concurrent_queries,
            shutdown_timeout_secs: parse_or("SHUTDOWN_TIMEOUT", defaults.shutdown_timeout_secs)?,
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            top_k: self.top_k,
            score_threshold: self.score_threshold,
            embedding_timeout: Duration::from_secs(self.embedding_timeout_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            max_summary_input_chars: self.max_summary_input_chars,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_kind_parse() {
        assert_eq!(EmbedderKind::parse("ONNX").unwrap(), EmbedderKind::Onnx);
        assert_eq!(EmbedderKind::parse("").unwrap(), EmbedderKind::Hashing);
        assert!(EmbedderKind::parse("word2vec").is_err());
    }

    #[test]
    fn test_defaults_map_to_pipeline_settings() {
        let settings = Config::default().pipeline_settings();
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.score_threshold, None);
        assert_eq!(settings.generation_timeout, Duration::from_secs(60));
        assert_eq!(settings.max_summary_input_chars, 4000);
    }
}
