use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::generation::Generator;
use crate::index::{EndpointIndex, RetrievalHit};
use crate::pipeline::executor::{CallExecutor, HttpTransport};
use crate::pipeline::summarizer::{ResponseSummarizer, NO_MATCH_SUMMARY};
use crate::pipeline::synthesizer::CallSynthesizer;
use crate::pipeline::types::{QueryTrace, Stage, TraceStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-query tuning, taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    /// `None` keeps every hit regardless of score.
    pub score_threshold: Option<f32>,
    pub embedding_timeout: Duration,
    pub generation_timeout: Duration,
    pub max_summary_input_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            score_threshold: None,
            embedding_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
            max_summary_input_chars: 4000,
        }
    }
}

/// Runs one query through retrieval, synthesis, execution and summarization.
///
/// Stages run sequentially inside the caller's task. The only state shared
/// between queries is the immutable index and the injected capabilities.
pub struct Orchestrator {
    index: Arc<EndpointIndex>,
    embedder: Arc<dyn Embedder>,
    synthesizer: CallSynthesizer,
    executor: CallExecutor,
    summarizer: ResponseSummarizer,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        index: Arc<EndpointIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            synthesizer: CallSynthesizer::new(generator.clone(), settings.generation_timeout),
            executor: CallExecutor::new(transport, base_url),
            summarizer: ResponseSummarizer::new(
                generator,
                settings.generation_timeout,
                settings.max_summary_input_chars,
            ),
            settings,
        }
    }

    pub fn index(&self) -> &Arc<EndpointIndex> {
        &self.index
    }

    /// Answer one natural-language query. Never errors: failures are recorded
    /// in the returned trace's status.
    pub async fn handle_query(&self, query: &str) -> QueryTrace {
        let start = Instant::now();
        let mut trace = QueryTrace::new(query);

        self.run(&mut trace).await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = match &trace.status {
            TraceStatus::Done => "done",
            TraceStatus::Failed { .. } => "failed",
        };
        metrics::counter!("queries_total", "status" => status).increment(1);
        metrics::histogram!("query_latency_ms").record(elapsed_ms);

        match &trace.status {
            TraceStatus::Done => tracing::info!(
                trace_id = %trace.trace_id,
                candidates = trace.retrieval.len(),
                elapsed_ms = elapsed_ms as u64,
                "Query done"
            ),
            TraceStatus::Failed { stage, error } => tracing::warn!(
                trace_id = %trace.trace_id,
                stage = %stage,
                error = %error,
                elapsed_ms = elapsed_ms as u64,
                "Query failed"
            ),
        }

        trace
    }

    async fn run(&self, trace: &mut QueryTrace) {
        let trace_id = trace.trace_id;

        tracing::debug!(%trace_id, stage = %Stage::Retrieving, "Entering stage");
        trace.retrieval = match self.retrieve(&trace.query).await {
            Ok(hits) => hits,
            Err(error) => return fail(trace, Stage::Retrieving, error),
        };

        tracing::debug!(%trace_id, stage = %Stage::Synthesizing, candidates = trace.retrieval.len(), "Entering stage");
        let descriptor = match self.synthesizer.synthesize(&trace.query, &trace.retrieval).await {
            Ok(d) => d,
            Err(PipelineError::NoCandidates) => {
                tracing::debug!(%trace_id, "No candidates retrieved");
                trace.summary = NO_MATCH_SUMMARY.to_string();
                return;
            }
            Err(error) => return fail(trace, Stage::Synthesizing, error),
        };

        if descriptor.is_no_match() {
            tracing::debug!(%trace_id, "Synthesizer reported no matching endpoint");
            trace.descriptor = Some(descriptor);
            trace.summary = NO_MATCH_SUMMARY.to_string();
            return;
        }

        tracing::debug!(%trace_id, stage = %Stage::Executing, endpoint = ?descriptor.endpoint, "Entering stage");
        let outcome = self.executor.execute(&descriptor).await;
        trace.descriptor = Some(descriptor);

        tracing::debug!(%trace_id, stage = %Stage::Summarizing, "Entering stage");
        trace.summary = self.summarizer.summarize(&trace.query, &outcome).await;
        trace.outcome = Some(outcome);
    }

    /// Embedding is CPU-bound, so the search runs on the blocking pool.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalHit>, PipelineError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let index = Arc::clone(&self.index);
        let embedder = Arc::clone(&self.embedder);
        let query = query.to_string();
        let k = self.settings.top_k;
        let threshold = self.settings.score_threshold.unwrap_or(0.0);

        let task = tokio::task::spawn_blocking(move || {
            index.search(embedder.as_ref(), &query, k, threshold)
        });

        tokio::time::timeout(self.settings.embedding_timeout, task)
            .await
            .map_err(|_| PipelineError::Timeout)?
            .map_err(|e| PipelineError::EmbeddingFailure(format!("Retrieval task failed: {}", e)))?
    }
}

fn fail(trace: &mut QueryTrace, stage: Stage, error: PipelineError) {
    trace.status = TraceStatus::Failed { stage, error };
}
