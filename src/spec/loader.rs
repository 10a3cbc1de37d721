//! Specification loading: fetches an OpenAPI-style document and flattens its
//! `paths` map into [`EndpointRecord`]s.

use crate::error::PipelineError;
use crate::spec::types::{EndpointParameter, EndpointRecord, HttpMethod, LoadedSpec};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

/// Result type for loader operations
pub type LoaderResult<T> = std::result::Result<T, PipelineError>;

/// Serialization format of a specification document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Json,
    Yaml,
    /// Try JSON first, fall back to YAML.
    Auto,
}

impl SpecFormat {
    /// Pick a format from the URL suffix and the response content type.
    pub fn detect(url: &str, content_type: Option<&str>) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            return SpecFormat::Yaml;
        }
        match content_type.map(|c| c.to_ascii_lowercase()) {
            Some(ct) if ct.contains("yaml") => SpecFormat::Yaml,
            Some(ct) if ct.contains("json") => SpecFormat::Json,
            _ => SpecFormat::Auto,
        }
    }
}

/// Fetch a specification document over HTTP and convert it to endpoint records.
///
/// # Errors
/// - `SpecUnavailable` on network failure, timeout, or a non-2xx status
/// - `SpecMalformed` when the body cannot be parsed or has no `paths` object
pub async fn fetch_spec(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> LoaderResult<LoadedSpec> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                PipelineError::SpecUnavailable(format!("timed out fetching {}", url))
            } else {
                PipelineError::SpecUnavailable(format!("failed to fetch {}: {}", url, e))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::SpecUnavailable(format!(
            "HTTP {} fetching {}",
            status.as_u16(),
            url
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::SpecUnavailable(format!("failed to read body: {}", e)))?;

    let format = SpecFormat::detect(url, content_type.as_deref());
    let records = parse_spec_document(&bytes, format)?;

    tracing::info!(
        url,
        endpoints = records.len(),
        ?format,
        "API specification loaded"
    );

    Ok(LoadedSpec {
        records,
        source_hash: hash_document(&bytes),
    })
}

/// Parse raw document bytes and extract endpoint records.
pub fn parse_spec_document(bytes: &[u8], format: SpecFormat) -> LoaderResult<Vec<EndpointRecord>> {
    let document = match format {
        SpecFormat::Json => parse_json(bytes)?,
        SpecFormat::Yaml => parse_yaml(bytes)?,
        SpecFormat::Auto => match parse_json(bytes) {
            Ok(doc) => doc,
            Err(json_err) => parse_yaml(bytes).map_err(|yaml_err| {
                PipelineError::SpecMalformed(format!(
                    "neither JSON ({}) nor YAML ({})",
                    json_err, yaml_err
                ))
            })?,
        },
    };

    extract_endpoints(&document)
}

fn parse_json(bytes: &[u8]) -> LoaderResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::SpecMalformed(format!("invalid JSON: {}", e)))
}

fn parse_yaml(bytes: &[u8]) -> LoaderResult<Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_slice(bytes)
        .map_err(|e| PipelineError::SpecMalformed(format!("invalid YAML: {}", e)))?;
    Ok(yaml_to_json(yaml))
}

/// YAML allows non-string mapping keys (e.g. unquoted `200:` response codes),
/// which JSON objects cannot hold; such keys are stringified.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(seq) => Value::Array(seq.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Hex-encoded SHA-256 of a document.
pub fn hash_document(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Flatten the top-level `paths` map into one record per (path, method).
///
/// Keys under a path item that are not one of the five supported verbs
/// (`parameters`, `servers`, `head`, `$ref`, ...) are skipped. Path-level
/// parameters are merged into every operation of that path.
pub fn extract_endpoints(document: &Value) -> LoaderResult<Vec<EndpointRecord>> {
    let paths = document
        .get("paths")
        .and_then(|p| p.as_object())
        .ok_or_else(|| {
            PipelineError::SpecMalformed("document has no top-level 'paths' object".into())
        })?;

    let mut records = Vec::new();

    for (path, path_item) in paths {
        let Some(item) = path_item.as_object() else {
            tracing::warn!(path = %path, "Skipping non-object path item");
            continue;
        };

        let shared_params = item.get("parameters");

        for (key, operation) in item {
            let Ok(method) = key.parse::<HttpMethod>() else {
                continue;
            };
            match operation.as_object() {
                Some(op) => records.push(normalize_operation(path, method, op, shared_params)),
                None => {
                    tracing::warn!(path = %path, method = %method, "Skipping non-object operation");
                }
            }
        }
    }

    tracing::debug!(paths = paths.len(), endpoints = records.len(), "Endpoint extraction complete");

    Ok(records)
}

fn normalize_operation(
    path: &str,
    method: HttpMethod,
    operation: &Map<String, Value>,
    shared_params: Option<&Value>,
) -> EndpointRecord {
    let text = |key: &str| {
        operation
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string()
    };

    let tags: BTreeSet<String> = operation
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    let request_body_schema = operation
        .get("requestBody")
        .and_then(|b| b.get("content"))
        .and_then(|c| c.get("application/json"))
        .and_then(|j| j.get("schema"))
        .cloned();

    EndpointRecord {
        path: path.to_string(),
        method,
        summary: text("summary"),
        description: text("description"),
        parameters: merge_parameters(shared_params, operation.get("parameters")),
        request_body_schema,
        tags,
    }
}

/// Combine path-level and operation-level parameters.
///
/// An operation parameter replaces a path parameter with the same
/// (name, location); order is path-level first, then operation-level.
fn merge_parameters(shared: Option<&Value>, own: Option<&Value>) -> Vec<EndpointParameter> {
    let mut merged: Vec<EndpointParameter> = parse_parameters(shared);

    for param in parse_parameters(own) {
        match merged
            .iter_mut()
            .find(|p| p.name == param.name && p.location == param.location)
        {
            Some(existing) => *existing = param,
            None => merged.push(param),
        }
    }

    merged
}

fn parse_parameters(value: Option<&Value>) -> Vec<EndpointParameter> {
    let Some(params) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    params
        .iter()
        .filter_map(|param| {
            let name = param.get("name")?.as_str()?.to_string();
            let location = param
                .get("in")
                .and_then(|l| l.as_str())
                .unwrap_or("query")
                .to_string();
            // Path parameters are always required in OpenAPI.
            let required = location == "path"
                || param.get("required").and_then(|r| r.as_bool()).unwrap_or(false);
            Some(EndpointParameter {
                name,
                location,
                required,
            })
        })
        .collect()
}
