//! Call synthesis: asks the generative model to pick exactly one endpoint from
//! the retrieved shortlist and fill in its parameters.
//!
//! # Framing contract
//! The prompt asks for a single JSON object inside a ```` ```json ```` fenced
//! block. Models do not always comply, so the extractor is tolerant: it takes
//! the last fenced block, else the text after the last `Final Answer:`
//! delimiter, else the whole output, and then narrows that region to the span
//! between its first `{` and last `}`. Only that span is parsed, strictly.

use crate::error::PipelineError;
use crate::generation::Generator;
use crate::index::RetrievalHit;
use crate::pipeline::types::CallDescriptor;
use crate::spec::HttpMethod;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

const ANSWER_DELIMITER: &str = "Final Answer:";

/// Tagged result of interpreting raw generated text.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Parsed(CallDescriptor),
    /// Not parseable as a descriptor object.
    ParseError(String),
    /// Parseable, but breaks the closed-world constraint or the descriptor shape.
    ValidationError(String),
}

impl From<SynthesisOutcome> for Result<CallDescriptor, PipelineError> {
    fn from(outcome: SynthesisOutcome) -> Self {
        match outcome {
            SynthesisOutcome::Parsed(d) => Ok(d),
            SynthesisOutcome::ParseError(m) => Err(PipelineError::SynthesisParseError(m)),
            SynthesisOutcome::ValidationError(m) => Err(PipelineError::SynthesisInvalid(m)),
        }
    }
}

pub struct CallSynthesizer {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl CallSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Derive one call descriptor for `query`, restricted to `candidates`.
    ///
    /// # Errors
    /// - `NoCandidates` when `candidates` is empty (the model is not called)
    /// - `Timeout` / `GenerationUnavailable` from the generator
    /// - `SynthesisParseError` / `SynthesisInvalid` from [`interpret`]
    pub async fn synthesize(
        &self,
        query: &str,
        candidates: &[RetrievalHit],
    ) -> Result<CallDescriptor, PipelineError> {
        if candidates.is_empty() {
            return Err(PipelineError::NoCandidates);
        }

        let prompt = build_prompt(query, candidates);
        let raw = tokio::time::timeout(self.timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| PipelineError::Timeout)??;

        tracing::debug!(
            model = %self.generator.model(),
            raw_chars = raw.len(),
            "Synthesis output received"
        );

        let outcome = interpret(&raw, candidates);
        if !matches!(outcome, SynthesisOutcome::Parsed(_)) {
            tracing::warn!(?outcome, raw = %raw, "Rejected synthesized call");
        }
        outcome.into()
    }
}

/// Build the generation prompt. The candidates are the only allowed endpoints.
pub fn build_prompt(query: &str, candidates: &[RetrievalHit]) -> String {
    let mut listing = String::new();
    for (i, hit) in candidates.iter().enumerate() {
        let record = &hit.entry.record;
        let _ = write!(listing, "{}. {} {}", i + 1, record.method, record.path);
        let summary = if record.summary.is_empty() {
            &hit.entry.embedding_text
        } else {
            &record.summary
        };
        if !summary.is_empty() {
            let _ = write!(listing, " - {}", summary);
        }
        if !record.parameters.is_empty() {
            let params: Vec<String> = record
                .parameters
                .iter()
                .map(|p| {
                    let marker = if p.required { "*" } else { "" };
                    format!("{}{} ({})", p.name, marker, p.location)
                })
                .collect();
            let _ = write!(listing, " | params: {}", params.join(", "));
        }
        if record.request_body_schema.is_some() {
            listing.push_str(" | accepts a JSON body");
        }
        listing.push('\n');
    }

    format!(
        r#"You are an API assistant that turns a user request into exactly one HTTP call.

Allowed endpoints (use ONLY one of these, exactly as written):
{listing}
Rules:
- Choose the single endpoint and method from the list above that best matches the request.
- Never invent an endpoint or method that is not listed.
- "parameters" holds path, query or body values as a JSON object (it may be empty).
  Parameters marked * are required.
- Reply with exactly one JSON object inside a ```json fenced block and nothing else.

Format:
```json
{{"endpoint": "/resource", "method": "GET", "parameters": {{}}, "description": "Fetches the resource list."}}
```

If no listed endpoint fits the request, reply with:
```json
{{"endpoint": null, "method": null, "parameters": {{}}, "description": "No relevant endpoint found."}}
```

User request: {query}
"#
    )
}

/// Locate the JSON object in raw model output (see the module docs).
pub fn extract_payload(raw: &str) -> Option<&str> {
    let region = last_fenced_block(raw)
        .or_else(|| raw.rsplit_once(ANSWER_DELIMITER).map(|(_, after)| after))
        .unwrap_or(raw);

    let start = region.find('{')?;
    let end = region.rfind('}')?;
    (end > start).then(|| &region[start..=end])
}

/// Content of the last closed ``` fence, if any contains an object.
fn last_fenced_block(raw: &str) -> Option<&str> {
    let parts: Vec<&str> = raw.split("```").collect();
    // parts[1], parts[3], ... are inside fences; the last part is never closed.
    (1..parts.len().saturating_sub(1))
        .step_by(2)
        .rev()
        .map(|i| parts[i])
        .find(|block| block.contains('{'))
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, alias = "params")]
    parameters: Option<Value>,
    #[serde(default)]
    request_body: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse raw output, then validate it against the candidates.
pub fn interpret(raw: &str, candidates: &[RetrievalHit]) -> SynthesisOutcome {
    let Some(payload) = extract_payload(raw) else {
        return SynthesisOutcome::ParseError("no JSON object found in output".into());
    };

    let parsed: RawDescriptor = match serde_json::from_str(payload) {
        Ok(p) => p,
        Err(e) => return SynthesisOutcome::ParseError(e.to_string()),
    };

    validate(parsed, candidates)
}

fn validate(raw: RawDescriptor, candidates: &[RetrievalHit]) -> SynthesisOutcome {
    let description = raw.description.unwrap_or_default();

    let endpoint = raw
        .endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let Some(endpoint) = endpoint else {
        return SynthesisOutcome::Parsed(CallDescriptor::no_match(description));
    };
    let endpoint = normalize_path(&endpoint);

    let Some(method_text) = raw.method.filter(|m| !m.trim().is_empty()) else {
        return SynthesisOutcome::ValidationError(format!("endpoint '{}' has no method", endpoint));
    };
    let method = match method_text.parse::<HttpMethod>() {
        Ok(m) => m,
        Err(e) => return SynthesisOutcome::ValidationError(e),
    };

    // Both sides are normalized; the descriptor carries the candidate's own path.
    let matched = candidates.iter().find(|hit| {
        hit.entry.record.method == method && normalize_path(&hit.entry.record.path) == endpoint
    });
    let Some(matched) = matched else {
        return SynthesisOutcome::ValidationError(format!(
            "{} {} is not one of the candidate endpoints",
            method, endpoint
        ));
    };
    let endpoint = matched.entry.record.path.clone();

    let mut parameters = match raw.parameters {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return SynthesisOutcome::ValidationError(format!(
                "parameters must be an object, got {}",
                other
            ))
        }
    };
    if let Some(Value::Object(body)) = raw.request_body {
        for (key, value) in body {
            parameters.entry(key).or_insert(value);
        }
    }

    SynthesisOutcome::Parsed(CallDescriptor {
        endpoint: Some(endpoint),
        method: Some(method),
        parameters,
        description,
    })
}

/// Add a missing leading slash and drop a trailing one.
fn normalize_path(endpoint: &str) -> String {
    let with_slash = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    };
    if with_slash.len() > 1 {
        with_slash.trim_end_matches('/').to_string()
    } else {
        with_slash
    }
}
