use crate::index::IndexManifest;
use crate::spec::HttpMethod;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct EndpointsResponse {
    pub manifest: IndexManifest,
    pub endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Serialize)]
pub struct EndpointSummary {
    pub path: String,
    pub method: HttpMethod,
    pub summary: String,
    pub tags: BTreeSet<String>,
}

/// GET /endpoints - List what the index can route to.
pub async fn endpoints_handler(State(state): State<Arc<AppState>>) -> Json<EndpointsResponse> {
    let endpoints = state
        .index
        .entries()
        .iter()
        .map(|entry| EndpointSummary {
            path: entry.record.path.clone(),
            method: entry.record.method,
            summary: entry.record.summary.clone(),
            tags: entry.record.tags.clone(),
        })
        .collect();

    Json(EndpointsResponse {
        manifest: state.index.manifest().clone(),
        endpoints,
    })
}
