//! Specification module: turns an OpenAPI-style API description into flat
//! endpoint records suitable for semantic indexing.

pub mod loader;
pub mod types;

pub use loader::{extract_endpoints, fetch_spec, hash_document, parse_spec_document, SpecFormat};
pub use types::{EndpointParameter, EndpointRecord, HttpMethod, LoadedSpec};
