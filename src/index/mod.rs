//! Endpoint index: one embedded entry per (path, method), searched by cosine
//! similarity.
//!
//! Build once, search many. The index is immutable after construction and is
//! shared between concurrent queries through an `Arc` without locking.

pub mod store;

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::spec::EndpointRecord;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use store::IndexFile;

/// An endpoint record with the text its vector was derived from.
///
/// The vector itself is the matching row of [`EndpointIndex`]'s matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub record: EndpointRecord,
    pub embedding_text: String,
}

impl IndexedEntry {
    pub fn new(record: EndpointRecord) -> Self {
        let embedding_text = record.embedding_text();
        Self {
            record,
            embedding_text,
        }
    }
}

/// Describes what an index was built from, so a load can refuse a stale or
/// incompatible index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedder_id: String,
    pub spec_hash: String,
    /// Unix seconds.
    pub built_at: u64,
    pub num_entries: usize,
    pub dimension: usize,
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub entry: IndexedEntry,
    /// Cosine similarity clamped to [0, 1].
    pub score: f32,
}

/// Whether `build` may reuse an index already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPolicy {
    /// Reuse the persisted index when its manifest matches the embedder and spec hash.
    ReuseMatching,
    /// Always recompute and overwrite.
    Rebuild,
}

pub struct EndpointIndex {
    manifest: IndexManifest,
    entries: Vec<IndexedEntry>,
    vectors: Array2<f32>,
}

impl EndpointIndex {
    /// Embed every record in memory. Nothing is persisted.
    pub fn from_records(
        records: Vec<EndpointRecord>,
        spec_hash: &str,
        embedder: &dyn Embedder,
    ) -> Result<Self, PipelineError> {
        let entries: Vec<IndexedEntry> = records.into_iter().map(IndexedEntry::new).collect();
        let texts: Vec<String> = entries.iter().map(|e| e.embedding_text.clone()).collect();

        let dimension = embedder.dimension();
        let embedded = embedder.embed_batch(&texts)?;

        let mut data = Vec::with_capacity(entries.len() * dimension);
        for (entry, vector) in entries.iter().zip(&embedded) {
            if vector.len() != dimension {
                return Err(PipelineError::EmbeddingFailure(format!(
                    "embedder returned {} dimensions for {} {} (expected {})",
                    vector.len(),
                    entry.record.method,
                    entry.record.path,
                    dimension
                )));
            }
            data.extend_from_slice(vector);
        }

        let vectors = Array2::from_shape_vec((entries.len(), dimension), data)
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;

        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            manifest: IndexManifest {
                embedder_id: embedder.id(),
                spec_hash: spec_hash.to_string(),
                built_at,
                num_entries: entries.len(),
                dimension,
            },
            entries,
            vectors,
        })
    }

    /// Build the index for `records` and persist it at `path`.
    ///
    /// With [`BuildPolicy::ReuseMatching`], a persisted index built by the same
    /// embedder from the same spec hash is returned as-is and nothing is
    /// re-embedded.
    pub fn build(
        records: Vec<EndpointRecord>,
        spec_hash: &str,
        embedder: &dyn Embedder,
        path: &Path,
        policy: BuildPolicy,
    ) -> Result<Self, PipelineError> {
        if policy == BuildPolicy::ReuseMatching {
            match Self::load(path, &embedder.id()) {
                Ok(existing) if existing.manifest.spec_hash == spec_hash => {
                    tracing::info!(
                        path = %path.display(),
                        entries = existing.len(),
                        "Reusing persisted endpoint index (manifest matches)"
                    );
                    return Ok(existing);
                }
                Ok(_) => tracing::info!("Specification changed since last build, rebuilding index"),
                Err(e) => tracing::info!(reason = %e, "No reusable index, building"),
            }
        }

        let start = std::time::Instant::now();
        let index = Self::from_records(records, spec_hash, embedder)?;
        index.persist(path)?;

        tracing::info!(
            entries = index.len(),
            dimension = index.manifest.dimension,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Endpoint index built"
        );
        Ok(index)
    }

    /// Write the index to `path` (atomic replace).
    pub fn persist(&self, path: &Path) -> Result<(), PipelineError> {
        IndexFile {
            manifest: self.manifest.clone(),
            entries: self.entries.clone(),
            vectors: self.vectors.clone(),
        }
        .save(path)
    }

    /// Load a persisted index, refusing one built by a different embedder.
    pub fn load(path: &Path, embedder_id: &str) -> Result<Self, PipelineError> {
        let file = IndexFile::load(path)?;

        if file.manifest.embedder_id != embedder_id {
            tracing::warn!(
                path = %path.display(),
                persisted = %file.manifest.embedder_id,
                configured = %embedder_id,
                "Persisted index was built by a different embedder, ignoring"
            );
            return Err(PipelineError::IndexMissing(format!(
                "index built with embedder '{}', configured '{}'",
                file.manifest.embedder_id, embedder_id
            )));
        }

        Ok(Self {
            manifest: file.manifest,
            entries: file.entries,
            vectors: file.vectors,
        })
    }

    /// Embed `query` and return the top `k` entries scoring at least `threshold`.
    pub fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievalHit>, PipelineError> {
        let embedder_id = embedder.id();
        if embedder_id != self.manifest.embedder_id {
            return Err(PipelineError::IndexMissing(format!(
                "index built with embedder '{}', queried with '{}'",
                self.manifest.embedder_id, embedder_id
            )));
        }

        let query_vector = embedder.embed(query)?;
        if query_vector.len() != self.manifest.dimension {
            return Err(PipelineError::EmbeddingFailure(format!(
                "query vector has {} dimensions (index has {})",
                query_vector.len(),
                self.manifest.dimension
            )));
        }

        Ok(self.search_vector(&Array1::from(query_vector), k, threshold))
    }

    /// Rank entries against an already-embedded query.
    ///
    /// Sorting is stable, so equal scores keep insertion order.
    pub fn search_vector(&self, query: &Array1<f32>, k: usize, threshold: f32) -> Vec<RetrievalHit> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = cosine_similarity(query, &self.vectors)
            .into_iter()
            .map(|s| s.clamp(0.0, 1.0))
            .enumerate()
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| RetrievalHit {
                entry: self.entries[idx].clone(),
                score,
            })
            .collect()
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cosine similarity between a query and every row of `vectors`.
///
/// Vectors are L2-normalised at embedding time, so this is a dot product.
/// NaN (from a degenerate vector) is mapped to 0.
fn cosine_similarity(query: &Array1<f32>, vectors: &Array2<f32>) -> Vec<f32> {
    vectors
        .outer_iter()
        .map(|row| {
            let score = query.dot(&row);
            if score.is_nan() {
                0.0
            } else {
                score
            }
        })
        .collect()
}
