//! The query pipeline: retrieve, synthesize, execute, summarize.

pub mod executor;
pub mod orchestrator;
pub mod summarizer;
pub mod synthesizer;
pub mod types;

pub use executor::{ApiRequest, ApiResponse, CallExecutor, HttpTransport, ReqwestTransport, TransportError};
pub use orchestrator::{Orchestrator, PipelineSettings};
pub use summarizer::{ResponseSummarizer, NO_MATCH_SUMMARY};
pub use synthesizer::{CallSynthesizer, SynthesisOutcome};
pub use types::{CallDescriptor, CallOutcome, QueryTrace, Stage, TraceStatus};
