use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure kinds produced by the query pipeline and its collaborators.
///
/// Every transport or parse error raised inside a stage is converted into one
/// of these before it leaves the component that produced it.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum PipelineError {
    #[error("API specification unavailable: {0}")]
    SpecUnavailable(String),

    #[error("API specification malformed: {0}")]
    SpecMalformed(String),

    #[error("Endpoint index missing: {0}")]
    IndexMissing(String),

    #[error("Endpoint index storage failed: {0}")]
    IndexStorage(String),

    #[error("No candidate endpoints to choose from")]
    NoCandidates,

    #[error("Could not parse generated call descriptor: {0}")]
    SynthesisParseError(String),

    #[error("Generated call descriptor rejected: {0}")]
    SynthesisInvalid(String),

    #[error("Execution failed: {reason}")]
    ExecutionFailure { reason: String },

    #[error("Operation timed out")]
    Timeout,

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Generative model unavailable: {0}")]
    GenerationUnavailable(String),
}

/// Errors surfaced by the HTTP layer.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),

    /// Local setup failed before serving; not attributable to any pipeline stage.
    #[error("Startup failed: {0}")]
    StartupError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::PipelineError(e) => {
                tracing::error!(error = %e, "Pipeline error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ValidationError(msg) => {
                tracing::warn!(error = %msg, "Validation error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::ResourceError(msg) => {
                tracing::warn!(error = %msg, "Resource error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::StartupError(msg) => {
                tracing::error!(error = %msg, "Startup error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub(crate) fn snippet(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
