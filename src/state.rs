use crate::config::{Config, EmbedderKind};
use crate::embedding::{Embedder, HashingEmbedder, OnnxEmbedder};
use crate::error::{AppError, PipelineError, Result};
use crate::generation::{Generator, OllamaGenerator};
use crate::index::{BuildPolicy, EndpointIndex};
use crate::pipeline::{HttpTransport, Orchestrator, ReqwestTransport};
use crate::spec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Application state shared across all request handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub index: Arc<EndpointIndex>,
    /// Bounds in-flight queries.
    pub semaphore: Arc<Semaphore>,
    /// Set once the index is loaded and the embedder has been warmed up.
    pub ready: AtomicBool,
    pub config: Arc<Config>,
}

impl AppState {
    /// Initialize application state from configuration.
    ///
    /// # Startup policy
    /// The API description is fetched first. A persisted index whose manifest matches the
    /// configured embedder and the fetched document's hash is reused, unless
    /// `REBUILD_INDEX` is set; otherwise the index is rebuilt and persisted.
    /// When the description cannot be fetched, a persisted index built by the same
    /// embedder is served as-is. With neither, startup fails.
    pub async fn new(config: Config) -> Result<Self> {
        let embedder = build_embedder(&config)?;
        tracing::info!(embedder = %embedder.id(), "Embedder initialized");

        let index = load_or_build_index(&config, Arc::clone(&embedder)).await?;

        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(
            &config.ollama_url,
            &config.ollama_model,
            Duration::from_secs(config.generation_timeout_secs),
        )?);

        let transport = build_transport(Duration::from_secs(config.execution_timeout_secs))?;

        // First embedding call pays for lazy initialization; do it before serving.
        warmup(Arc::clone(&embedder)).await?;

        Ok(Self::from_parts(config, Arc::new(index), embedder, generator, transport))
    }

    /// Assemble state from already-built components. The result is marked ready.
    pub fn from_parts(
        config: Config,
        index: Arc<EndpointIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::clone(&index),
            embedder,
            generator,
            transport,
            &config.target_base_url,
            config.pipeline_settings(),
        );

        metrics::gauge!("index_entries").set(index.len() as f64);

        Self {
            orchestrator: Arc::new(orchestrator),
            index,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_queries)),
            ready: AtomicBool::new(true),
            config: Arc::new(config),
        }
    }

    /// Check if the service is ready to handle requests.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedder {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.hashing_dimension))),
        EmbedderKind::Onnx => {
            let pool_size = config.embedding_pool_size.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });
            tracing::info!(
                model = %config.embedding_model_path.display(),
                pool_size,
                "Loading ONNX embedder"
            );
            let embedder = OnnxEmbedder::load(
                &config.embedding_model_path,
                &config.embedding_tokenizer_path,
                config.embedding_max_length,
                pool_size,
            )?;
            Ok(Arc::new(embedder))
        }
    }
}

fn build_transport(timeout: Duration) -> Result<Arc<dyn HttpTransport>> {
    let transport = ReqwestTransport::new(timeout)
        .map_err(|e| AppError::StartupError(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Arc::new(transport))
}

async fn load_or_build_index(config: &Config, embedder: Arc<dyn Embedder>) -> Result<EndpointIndex> {
    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(config.spec_timeout_secs);
    let path = config.index_path.clone();

    match spec::fetch_spec(&client, &config.spec_url, timeout).await {
        Ok(loaded) => {
            tracing::info!(
                url = %config.spec_url,
                endpoints = loaded.records.len(),
                "Specification loaded"
            );
            let policy = if config.rebuild_index {
                BuildPolicy::Rebuild
            } else {
                BuildPolicy::ReuseMatching
            };

            // Embedding every record is CPU-bound, file I/O is blocking.
            let index = tokio::task::spawn_blocking(move || {
                EndpointIndex::build(
                    loaded.records,
                    &loaded.source_hash,
                    embedder.as_ref(),
                    &path,
                    policy,
                )
            })
            .await
            .map_err(|e| PipelineError::IndexStorage(format!("Index build task failed: {}", e)))??;

            Ok(index)
        }
        Err(fetch_err @ PipelineError::SpecUnavailable(_)) => {
            tracing::warn!(
                url = %config.spec_url,
                error = %fetch_err,
                "Specification unavailable, trying persisted index"
            );
            let embedder_id = embedder.id();
            let index = tokio::task::spawn_blocking(move || EndpointIndex::load(&path, &embedder_id))
                .await
                .map_err(|e| PipelineError::IndexMissing(format!("Index load task failed: {}", e)))?
                .map_err(|load_err| {
                    tracing::error!(error = %load_err, "No persisted index to fall back to");
                    fetch_err
                })?;

            tracing::warn!(
                entries = index.len(),
                built_at = index.manifest().built_at,
                "Serving persisted index; it may be stale"
            );
            Ok(index)
        }
        Err(e) => Err(e.into()),
    }
}

async fn warmup(embedder: Arc<dyn Embedder>) -> Result<()> {
    tracing::info!("Running embedder warmup...");
    tokio::task::spawn_blocking(move || embedder.embed("warmup query"))
        .await
        .map_err(|e| PipelineError::EmbeddingFailure(format!("Warmup task failed: {}", e)))??;
    tracing::info!("Embedder warmup completed successfully");
    Ok(())
}
