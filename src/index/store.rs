//! Persistence layer for the endpoint index.
//!
//! The whole index (manifest, entries, vectors) lives in one binary file. A
//! save never mutates the existing file: it writes a fresh temporary file in
//! the same directory and atomically renames it over the target, so readers
//! and concurrent builders only ever observe a complete index.

use crate::error::PipelineError;
use crate::index::{IndexManifest, IndexedEntry};
use ndarray::Array2;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Index file format version. Increment when the layout changes.
const INDEX_FORMAT_VERSION: u32 = 1;

/// Magic bytes to identify valid index files.
const INDEX_MAGIC: &[u8; 8] = b"CALLSMTH";

/// Decoded contents of an index file.
pub struct IndexFile {
    pub manifest: IndexManifest,
    pub entries: Vec<IndexedEntry>,
    pub vectors: Array2<f32>,
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::IndexStorage(format!("{}: {}", context, e))
}

fn corrupt(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::IndexMissing(format!("{}: {}", context, e))
}

impl IndexFile {
    /// Save the index atomically.
    ///
    /// File format:
    /// - 8 bytes: magic "CALLSMTH"
    /// - 4 bytes: format version (u32 LE)
    /// - 8 bytes: manifest length (u64 LE), then manifest JSON
    /// - 8 bytes: entries length (u64 LE), then entries JSON
    /// - N bytes: vectors (f32 LE, row-major, num_entries × dimension)
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| storage_err("Failed to create index directory", e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index.bin".to_string());
        let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let result = self.write_to(&tmp_path).and_then(|size_bytes| {
            fs::rename(&tmp_path, path)
                .map_err(|e| storage_err("Failed to move index into place", e))?;
            Ok(size_bytes)
        });

        match result {
            Ok(size_bytes) => {
                tracing::info!(
                    path = %path.display(),
                    num_entries = self.manifest.num_entries,
                    dimension = self.manifest.dimension,
                    size_bytes,
                    "Endpoint index saved"
                );
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    fn write_to(&self, path: &Path) -> Result<usize, PipelineError> {
        let manifest_json = serde_json::to_vec(&self.manifest)
            .map_err(|e| storage_err("Failed to encode manifest", e))?;
        let entries_json = serde_json::to_vec(&self.entries)
            .map_err(|e| storage_err("Failed to encode entries", e))?;

        let file = File::create(path).map_err(|e| storage_err("Failed to create index file", e))?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(INDEX_MAGIC)
            .and_then(|_| writer.write_all(&INDEX_FORMAT_VERSION.to_le_bytes()))
            .and_then(|_| writer.write_all(&(manifest_json.len() as u64).to_le_bytes()))
            .and_then(|_| writer.write_all(&manifest_json))
            .and_then(|_| writer.write_all(&(entries_json.len() as u64).to_le_bytes()))
            .and_then(|_| writer.write_all(&entries_json))
            .map_err(|e| storage_err("Failed to write index header", e))?;

        for &val in self.vectors.iter() {
            writer
                .write_all(&val.to_le_bytes())
                .map_err(|e| storage_err("Failed to write vector data", e))?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| storage_err("Failed to flush index file", e))?;
        file.sync_all()
            .map_err(|e| storage_err("Failed to sync index file", e))?;

        Ok(8 + 4 + 8 + manifest_json.len() + 8 + entries_json.len() + self.vectors.len() * 4)
    }

    /// Load an index file.
    ///
    /// A missing file, foreign magic, other format version, or truncated
    /// content all surface as `IndexMissing`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Index file does not exist");
            return Err(PipelineError::IndexMissing(format!(
                "no index at {}",
                path.display()
            )));
        }

        let file = File::open(path).map_err(|e| corrupt("Failed to open index file", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| corrupt("Failed to stat index file", e))?
            .len();
        let mut reader = BufReader::new(file);
        // Bytes left after magic and version; every length prefix is checked against it.
        let mut remaining = file_len.saturating_sub(12);

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() || &magic != INDEX_MAGIC {
            tracing::warn!(path = %path.display(), "Invalid index magic, ignoring");
            return Err(PipelineError::IndexMissing("invalid index magic".into()));
        }

        let version = u32::from_le_bytes(read_array(&mut reader, "format version")?);
        if version != INDEX_FORMAT_VERSION {
            tracing::warn!(
                path = %path.display(),
                file_version = version,
                expected_version = INDEX_FORMAT_VERSION,
                "Index format version mismatch, ignoring"
            );
            return Err(PipelineError::IndexMissing(format!(
                "index format version {} (expected {})",
                version, INDEX_FORMAT_VERSION
            )));
        }

        let manifest_bytes = read_block(&mut reader, &mut remaining, "manifest")?;
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt("Failed to decode manifest", e))?;

        let entries_bytes = read_block(&mut reader, &mut remaining, "entries")?;
        let entries: Vec<IndexedEntry> = serde_json::from_slice(&entries_bytes)
            .map_err(|e| corrupt("Failed to decode entries", e))?;

        if entries.len() != manifest.num_entries {
            return Err(PipelineError::IndexMissing(format!(
                "manifest lists {} entries, file holds {}",
                manifest.num_entries,
                entries.len()
            )));
        }

        let vector_bytes = manifest
            .num_entries
            .checked_mul(manifest.dimension)
            .and_then(|n| n.checked_mul(4))
            .filter(|&n| n as u64 <= remaining)
            .ok_or_else(|| {
                PipelineError::IndexMissing(format!(
                    "{} x {} vectors do not fit in the remaining {} bytes",
                    manifest.num_entries, manifest.dimension, remaining
                ))
            })?;
        let mut raw = vec![0u8; vector_bytes];
        reader
            .read_exact(&mut raw)
            .map_err(|e| corrupt("Failed to read vector data", e))?;
        let data: Vec<f32> = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let vectors = Array2::from_shape_vec((manifest.num_entries, manifest.dimension), data)
            .map_err(|e| corrupt("Failed to reshape vectors", e))?;

        tracing::info!(
            path = %path.display(),
            num_entries = manifest.num_entries,
            dimension = manifest.dimension,
            embedder = %manifest.embedder_id,
            "Endpoint index loaded"
        );

        Ok(Self {
            manifest,
            entries,
            vectors,
        })
    }
}

fn read_array<const N: usize>(reader: &mut impl Read, what: &str) -> Result<[u8; N], PipelineError> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| corrupt(&format!("Failed to read {}", what), e))?;
    Ok(buf)
}

/// Read a u64-length-prefixed block, refusing lengths past the end of the file.
fn read_block(
    reader: &mut impl Read,
    remaining: &mut u64,
    what: &str,
) -> Result<Vec<u8>, PipelineError> {
    let len = u64::from_le_bytes(read_array(reader, what)?);
    *remaining = remaining.saturating_sub(8);
    if len > *remaining {
        return Err(PipelineError::IndexMissing(format!(
            "{} length {} exceeds the {} bytes left in the file",
            what, len, remaining
        )));
    }
    *remaining -= len;

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|e| corrupt(&format!("Failed to read {}", what), e))?;
    Ok(buf)
}
