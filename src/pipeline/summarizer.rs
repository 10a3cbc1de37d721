//! Natural-language summaries of call outcomes.

use crate::generation::Generator;
use crate::pipeline::types::CallOutcome;
use std::sync::Arc;
use std::time::Duration;

/// Summary used when no endpoint fits the query.
pub const NO_MATCH_SUMMARY: &str =
    "No relevant endpoint found for this request, so no API call was made.";

pub fn failure_summary(reason: &str) -> String {
    format!("The API request failed: {}", reason)
}

pub fn fallback_summary(status_code: u16) -> String {
    format!(
        "The request succeeded (HTTP {}), but a summary could not be generated. See the raw data for details.",
        status_code
    )
}

pub struct ResponseSummarizer {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    max_input_chars: usize,
}

impl ResponseSummarizer {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration, max_input_chars: usize) -> Self {
        Self {
            generator,
            timeout,
            max_input_chars,
        }
    }

    /// Always returns a non-empty summary. Failures never reach the model.
    pub async fn summarize(&self, query: &str, outcome: &CallOutcome) -> String {
        let (status_code, body) = match outcome {
            CallOutcome::Failure { reason } => return failure_summary(reason),
            CallOutcome::Success { status_code, body } => (*status_code, body),
        };

        let data = truncate_chars(&body.to_string(), self.max_input_chars);
        let prompt = format!(
            "A user asked: \"{query}\"\n\
             The API returned HTTP {status_code} with this JSON data:\n{data}\n\n\
             Answer the user's question in a few plain sentences using only this data. \
             Do not mention JSON or the API."
        );

        match tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                tracing::warn!("Summary generation returned blank output");
                fallback_summary(status_code)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Summary generation failed");
                fallback_summary(status_code)
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Summary generation timed out");
                fallback_summary(status_code)
            }
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
