//! Type definitions for the spec module.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs an endpoint record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether call parameters travel as a JSON body rather than a query string.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| format!("unsupported HTTP method '{}'", s.trim()))
    }
}

/// One documented parameter of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointParameter {
    pub name: String,
    /// Where the parameter lives: `path`, `query`, `header` or `cookie`.
    pub location: String,
    pub required: bool,
}

/// A single (path, method) operation taken from an API description.
///
/// Identity is the `(path, method)` pair. Records are created in bulk by the
/// loader and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<EndpointParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_schema: Option<Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl EndpointRecord {
    pub fn new(path: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            path: path.into(),
            method,
            summary: String::new(),
            description: String::new(),
            parameters: Vec::new(),
            request_body_schema: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn identity(&self) -> (&str, HttpMethod) {
        (&self.path, self.method)
    }

    /// Text fed to the embedder: description, else summary, else `METHOD path`.
    pub fn embedding_text(&self) -> String {
        if !self.description.trim().is_empty() {
            self.description.trim().to_string()
        } else if !self.summary.trim().is_empty() {
            self.summary.trim().to_string()
        } else {
            format!("{} {}", self.method, self.path)
        }
    }
}

/// Result of loading a specification document.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub records: Vec<EndpointRecord>,
    /// Hex-encoded SHA-256 of the raw document bytes.
    pub source_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!(" Patch ".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("OPTIONS".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_method_serializes_uppercase() {
        assert_eq!(serde_json::to_value(HttpMethod::Delete).unwrap(), "DELETE");
    }

    #[test]
    fn test_embedding_text_fallbacks() {
        let mut record = EndpointRecord::new("/clients", HttpMethod::Get);
        assert_eq!(record.embedding_text(), "GET /clients");

        record.summary = "List clients".into();
        assert_eq!(record.embedding_text(), "List clients");

        record.description = "Retrieve every client.".into();
        assert_eq!(record.embedding_text(), "Retrieve every client.");
    }

    #[test]
    fn test_body_placement_by_method() {
        assert!(!HttpMethod::Get.carries_body());
        assert!(!HttpMethod::Delete.carries_body());
        assert!(HttpMethod::Post.carries_body());
        assert!(HttpMethod::Put.carries_body());
        assert!(HttpMethod::Patch.carries_body());
    }
}
