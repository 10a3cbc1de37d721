//! Data flowing between pipeline stages.

use crate::error::PipelineError;
use crate::index::RetrievalHit;
use crate::spec::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// One synthesized HTTP call.
///
/// A `None` endpoint is the explicit "no match" sentinel. A `Some` endpoint is
/// always one of the candidate paths the synthesizer was offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub endpoint: Option<String>,
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub description: String,
}

impl CallDescriptor {
    pub fn no_match(description: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            method: None,
            parameters: Map::new(),
            description: description.into(),
        }
    }

    pub fn is_no_match(&self) -> bool {
        self.endpoint.is_none()
    }
}

/// Normalized result of executing a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutcome {
    /// 2xx response. `body` is parsed JSON, or a JSON string holding the raw
    /// text when the body is not JSON.
    Success { status_code: u16, body: Value },
    Failure { reason: String },
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieving,
    Synthesizing,
    Executing,
    Summarizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Retrieving => "retrieving",
            Stage::Synthesizing => "synthesizing",
            Stage::Executing => "executing",
            Stage::Summarizing => "summarizing",
        };
        f.write_str(name)
    }
}

/// Terminal state of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TraceStatus {
    Done,
    Failed { stage: Stage, error: PipelineError },
}

/// Full audit trail of one query. Fields are filled up to the stage the query
/// reached.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTrace {
    pub trace_id: Uuid,
    pub query: String,
    pub retrieval: Vec<RetrievalHit>,
    pub descriptor: Option<CallDescriptor>,
    pub outcome: Option<CallOutcome>,
    pub summary: String,
    pub status: TraceStatus,
}

impl QueryTrace {
    pub fn new(query: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            query: query.to_string(),
            retrieval: Vec::new(),
            descriptor: None,
            outcome: None,
            summary: String::new(),
            status: TraceStatus::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TraceStatus::Done
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.status {
            TraceStatus::Failed { stage, .. } => Some(*stage),
            TraceStatus::Done => None,
        }
    }
}
