//! Index cache on disk.
//!
//! A built index is written as one JSON snapshot per (document, chunking)
//! pair. The snapshot records which embedder produced the vectors; a snapshot
//! from a different embedder, or for different document text, is never reused.

use crate::config::ChunkingConfig;
use crate::embeddings::{Embedder, EmbedderFingerprint};
use crate::error::Result;
use crate::index::{IndexEntry, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 2;

/// Atomically write JSON data to a file.
///
/// Writes to a `.tmp` sibling, then renames over the target. Creates parent
/// directories if they don't exist.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    let value =
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Serialized form of a built index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub document_hash: String,
    pub chunking: ChunkingConfig,
    pub embedder: EmbedderFingerprint,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

/// Why a cached snapshot was not reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Version { found: u32 },
    DocumentChanged,
    ChunkingChanged,
    EmbedderChanged { cached: EmbedderFingerprint },
}

impl IndexSnapshot {
    pub fn capture(document_hash: &str, chunking: ChunkingConfig, index: &VectorIndex) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            document_hash: document_hash.to_string(),
            chunking,
            embedder: index.fingerprint(),
            dimensions: index.dimensions().unwrap_or(0),
            created_at: Utc::now(),
            entries: index.entries().to_vec(),
        }
    }

    /// Check this snapshot against the current document, chunking and embedder.
    pub fn staleness(
        &self,
        document_hash: &str,
        chunking: &ChunkingConfig,
        embedder: &EmbedderFingerprint,
    ) -> Option<Staleness> {
        if self.version != SNAPSHOT_VERSION {
            Some(Staleness::Version {
                found: self.version,
            })
        } else if self.document_hash != document_hash {
            Some(Staleness::DocumentChanged)
        } else if &self.chunking != chunking {
            Some(Staleness::ChunkingChanged)
        } else if &self.embedder != embedder {
            Some(Staleness::EmbedderChanged {
                cached: self.embedder.clone(),
            })
        } else {
            None
        }
    }
}

/// Directory of index snapshots.
#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot path for a document hash under the given chunking.
    pub fn path_for(&self, document_hash: &str, chunking: &ChunkingConfig) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(document_hash.as_bytes());
        hasher.update((chunking.chunk_size as u64).to_le_bytes());
        hasher.update((chunking.chunk_overlap as u64).to_le_bytes());
        let key: String = hasher
            .finalize()
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect();
        self.dir.join(format!("{key}.json"))
    }

    /// Persist `index` for later sessions.
    pub fn save(
        &self,
        document_hash: &str,
        chunking: ChunkingConfig,
        index: &VectorIndex,
    ) -> Result<PathBuf> {
        let path = self.path_for(document_hash, &chunking);
        let snapshot = IndexSnapshot::capture(document_hash, chunking, index);
        atomic_write_json(&path, &snapshot)?;
        info!(
            path = %path.display(),
            passages = snapshot.entries.len(),
            dims = snapshot.dimensions,
            "Saved index snapshot"
        );
        Ok(path)
    }

    /// Restore a cached index if one exists and still matches.
    ///
    /// Stale or unreadable snapshots yield `Ok(None)` so the caller rebuilds.
    pub fn load(
        &self,
        document_hash: &str,
        chunking: ChunkingConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Option<VectorIndex>> {
        let path = self.path_for(document_hash, &chunking);
        let snapshot: IndexSnapshot = match load_json(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(path = %path.display(), "No cached index");
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt index snapshot");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read index snapshot");
                return Ok(None);
            }
        };

        if let Some(reason) = snapshot.staleness(document_hash, &chunking, &embedder.fingerprint())
        {
            info!(path = %path.display(), reason = ?reason, "Cached index is stale");
            return Ok(None);
        }

        let index = match VectorIndex::from_entries(embedder, snapshot.entries) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring inconsistent index snapshot");
                return Ok(None);
            }
        };
        info!(
            path = %path.display(),
            passages = index.len(),
            cached_at = %snapshot.created_at,
            "Loaded cached index"
        );
        Ok(Some(index))
    }
}
