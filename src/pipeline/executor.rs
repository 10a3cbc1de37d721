//! Call execution against the target API.

use crate::error::snippet;
use crate::pipeline::types::{CallDescriptor, CallOutcome};
use crate::spec::HttpMethod;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const REASON_SNIPPET_CHARS: usize = 200;

/// A fully prepared request, independent of the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// Sends a prepared request. Only transport problems are errors; any HTTP
/// status is a response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport with a whole-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;

        Ok(ApiResponse { status, body })
    }
}

pub struct CallExecutor {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl CallExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Turn a descriptor into a concrete request.
    ///
    /// `{name}` path segments consume the matching parameter. Whatever is left
    /// becomes query parameters for GET/DELETE or a JSON body otherwise.
    pub fn prepare(&self, descriptor: &CallDescriptor) -> Result<ApiRequest, String> {
        let endpoint = descriptor
            .endpoint
            .as_deref()
            .ok_or_else(|| "descriptor has no endpoint".to_string())?;
        let method = descriptor
            .method
            .ok_or_else(|| format!("descriptor for {} has no method", endpoint))?;

        let mut remaining = descriptor.parameters.clone();
        let path = fill_path_template(endpoint, &mut remaining)?;
        let url = format!("{}{}", self.base_url, path);

        let (query, body) = if method.carries_body() {
            (Vec::new(), Some(Value::Object(remaining)))
        } else {
            (query_pairs(&remaining), None)
        };

        Ok(ApiRequest {
            method,
            url,
            query,
            body,
        })
    }

    /// Perform the call. Every problem is reported as `Failure`; this never errors.
    pub async fn execute(&self, descriptor: &CallDescriptor) -> CallOutcome {
        let request = match self.prepare(descriptor) {
            Ok(r) => r,
            Err(reason) => return CallOutcome::Failure { reason },
        };

        let method = request.method;
        let url = request.url.clone();
        let start = Instant::now();

        let outcome = match self.transport.send(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                let body = serde_json::from_str(&response.body)
                    .unwrap_or_else(|_| Value::String(response.body.clone()));
                CallOutcome::Success {
                    status_code: response.status,
                    body,
                }
            }
            Ok(response) => CallOutcome::Failure {
                reason: format!(
                    "HTTP {}: {}",
                    response.status,
                    snippet(&response.body, REASON_SNIPPET_CHARS)
                ),
            },
            Err(TransportError::Timeout) => CallOutcome::Failure {
                reason: format!("request to {} timed out", url),
            },
            Err(TransportError::Network(msg)) => CallOutcome::Failure {
                reason: format!("request to {} failed: {}", url, msg),
            },
        };

        let result = match &outcome {
            CallOutcome::Success { .. } => "success",
            CallOutcome::Failure { .. } => "failure",
        };
        metrics::counter!("target_api_calls_total", "result" => result).increment(1);

        tracing::info!(
            method = %method,
            url = %url,
            result,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Target API call finished"
        );

        outcome
    }
}

fn fill_path_template(endpoint: &str, params: &mut Map<String, Value>) -> Result<String, String> {
    let mut path = String::with_capacity(endpoint.len());
    let mut rest = endpoint;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        let name = &rest[open + 1..close];
        let value = params
            .remove(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| format!("missing value for path parameter '{}'", name))?;

        path.push_str(&rest[..open]);
        path.push_str(&urlencoding::encode(&scalar_text(&value)));
        rest = &rest[close + 1..];
    }
    path.push_str(rest);

    Ok(path)
}

/// Query pairs in parameter order. Arrays repeat the key; nulls are dropped.
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|v| !v.is_null()) {
                    pairs.push((key.clone(), scalar_text(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
