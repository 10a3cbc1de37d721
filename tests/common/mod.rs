//! Deterministic stand-ins for the generative model and the target API.

#![allow(dead_code)]

use async_trait::async_trait;
use callsmith::embedding::{Embedder, HashingEmbedder};
use callsmith::index::EndpointIndex;
use callsmith::pipeline::{ApiRequest, ApiResponse, HttpTransport, TransportError};
use callsmith::spec::{extract_endpoints, EndpointRecord};
use callsmith::PipelineError;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays canned replies in order; once exhausted, repeats the last one.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, PipelineError>>>,
    last: Mutex<Option<Result<String, PipelineError>>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = Result<String, PipelineError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl callsmith::generation::Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(PipelineError::GenerationUnavailable("no script".into()))),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Hashing embedder that blocks the calling thread before each embedding.
pub struct SleepingEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SleepingEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for SleepingEmbedder {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.embed(text)
    }
}

/// Answers every request with a fixed status and body, recording requests.
pub struct RecordingTransport {
    status: u16,
    body: String,
    pub requests: Mutex<Vec<ApiRequest>>,
}

impl RecordingTransport {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(ApiResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

/// The client-engagement service the pipeline is exercised against.
pub fn client_engagement_spec() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": { "title": "Client Engagement API", "version": "0.1.0" },
        "paths": {
            "/client-engagements": {
                "get": {
                    "summary": "Get all client engagements",
                    "description": "Retrieve a list of all client engagement records.",
                    "tags": ["engagements"]
                },
                "post": {
                    "summary": "Create a client engagement",
                    "description": "Create a new client engagement record.",
                    "tags": ["engagements"],
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/ClientEngagement" }
                            }
                        }
                    }
                }
            },
            "/client-engagements/{client_id}": {
                "parameters": [
                    { "name": "client_id", "in": "path", "required": true }
                ],
                "get": {
                    "summary": "Get a client engagement",
                    "description": "Retrieve a single client engagement record by its ID.",
                    "tags": ["engagements"]
                },
                "delete": {
                    "summary": "Delete a client engagement",
                    "description": "Delete a client engagement record by its ID.",
                    "tags": ["engagements"]
                }
            }
        }
    })
}

pub fn client_engagement_records() -> Vec<EndpointRecord> {
    extract_endpoints(&client_engagement_spec()).unwrap()
}

pub fn client_engagement_index() -> EndpointIndex {
    EndpointIndex::from_records(
        client_engagement_records(),
        "test-spec",
        &HashingEmbedder::default(),
    )
    .unwrap()
}

pub fn empty_index() -> EndpointIndex {
    EndpointIndex::from_records(Vec::new(), "empty", &HashingEmbedder::default()).unwrap()
}
