//! Callsmith - natural-language requests to REST calls
//!
//! Loads an OpenAPI document, indexes its endpoints by embedding, and answers
//! free-text queries by retrieving candidate endpoints, synthesizing one call
//! with a generative model, executing it, and summarizing the response.

pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod index;
pub mod pipeline;
pub mod spec;
pub mod state;

// Re-export key types for convenience
pub use config::Config;
pub use error::{AppError, PipelineError, Result};
pub use handlers::{endpoints_handler, health_handler, query_handler, ready_handler};
pub use index::EndpointIndex;
pub use pipeline::{Orchestrator, QueryTrace};
pub use state::AppState;
