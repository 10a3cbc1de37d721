use crate::error::{AppError, Result};
use crate::pipeline::QueryTrace;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// The natural-language request to turn into an API call
    pub query: String,
}

/// POST /query - Answer a natural-language request with one API call.
///
/// # Flow
/// 1. Validate input
/// 2. Acquire semaphore permit (503 if the service stays saturated for 5s)
/// 3. Run the pipeline: retrieve, synthesize, execute, summarize
///
/// Both `done` and `failed` traces are returned with 200; the trace's `status`
/// says which stage failed and why.
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryTrace>> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::ValidationError("Query cannot be empty".to_string()));
    }

    let _permit = tokio::time::timeout(Duration::from_secs(5), state.semaphore.acquire())
        .await
        .map_err(|_| {
            AppError::ResourceError("Service temporarily overloaded, please retry".to_string())
        })?
        .map_err(|_| AppError::ResourceError("Semaphore closed".to_string()))?;

    let trace = state.orchestrator.handle_query(query).await;

    Ok(Json(trace))
}
