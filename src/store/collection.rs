//! Collection persistence: descriptor file and per-point files.
//!
//! On-disk layout under the store's base path:
//! ```text
//! base_path/<collection_name>/
//!   collection.json        descriptor: dimension, metric, creation time
//!   points/<sha256>.json   one file per point, named from its id
//!   index/                 ANN artifacts, written by the index engine
//! ```
//! Point files are written via write-temp-then-rename so a crash never
//! leaves a half-written point behind. File names are the hex SHA-256 of the
//! point id, which keeps arbitrary ids filesystem-safe and deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::index::DistanceMetric;
use crate::store::point::Point;

/// Descriptor file name inside a collection directory.
const COLLECTION_FILE: &str = "collection.json";

/// Directory holding per-point files.
const POINTS_DIR: &str = "points";

/// Persisted collection descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub vector_dim: usize,
    pub distance_metric: DistanceMetric,
    pub created_at: DateTime<Utc>,
}

/// An opened collection: its directory plus parsed descriptor.
#[derive(Debug, Clone)]
pub struct Collection {
    path: PathBuf,
    meta: CollectionMeta,
}

impl Collection {
    /// Creates a collection under `base`, or opens it if it already exists
    /// with the same dimension. A dimension conflict is an error.
    pub fn create(
        base: &Path,
        name: &str,
        vector_dim: usize,
        distance_metric: DistanceMetric,
    ) -> StoreResult<Self> {
        validate_name(name)?;

        let path = base.join(name);
        if path.join(COLLECTION_FILE).exists() {
            let existing = Self::open(base, name)?;
            if existing.meta.vector_dim != vector_dim {
                return Err(StoreError::CollectionDimensionConflict {
                    name: name.to_string(),
                    existing: existing.meta.vector_dim,
                    requested: vector_dim,
                });
            }
            return Ok(existing);
        }

        let meta = CollectionMeta {
            name: name.to_string(),
            vector_dim,
            distance_metric,
            created_at: Utc::now(),
        };

        fs::create_dir_all(path.join(POINTS_DIR)).map_err(|e| io_err(&path, e))?;
        write_atomic(
            &path,
            COLLECTION_FILE,
            &serde_json::to_vec_pretty(&meta).map_err(|e| StoreError::Corrupted {
                path: path.join(COLLECTION_FILE),
                reason: e.to_string(),
            })?,
        )?;

        Ok(Self { path, meta })
    }

    /// Opens an existing collection.
    pub fn open(base: &Path, name: &str) -> StoreResult<Self> {
        let path = base.join(name);
        let descriptor = path.join(COLLECTION_FILE);

        let bytes = match fs::read(&descriptor) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CollectionNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(io_err(&descriptor, e)),
        };

        let meta: CollectionMeta =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupted {
                path: descriptor,
                reason: e.to_string(),
            })?;

        Ok(Self { path, meta })
    }

    /// True when a descriptor exists for `name` under `base`.
    #[must_use]
    pub fn exists(base: &Path, name: &str) -> bool {
        base.join(name).join(COLLECTION_FILE).exists()
    }

    /// Collection directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed descriptor.
    #[must_use]
    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    /// File path for a point id.
    #[must_use]
    pub fn point_path(&self, id: &str) -> PathBuf {
        let digest = Sha256::digest(id.as_bytes());
        self.path
            .join(POINTS_DIR)
            .join(format!("{digest:x}.json"))
    }

    /// Writes (creates or overwrites) a point file via temp-then-rename.
    ///
    /// The caller validates the point before writing.
    pub fn write_point(&self, point: &Point) -> StoreResult<()> {
        let target = self.point_path(&point.id);
        let bytes = serde_json::to_vec(point).map_err(|e| StoreError::Corrupted {
            path: target.clone(),
            reason: e.to_string(),
        })?;

        let points_dir = self.path.join(POINTS_DIR);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&points_dir).map_err(|e| io_err(&points_dir, e))?;
        tmp.write_all(&bytes).map_err(|e| io_err(&target, e))?;
        tmp.persist(&target)
            .map_err(|e| io_err(&target, e.error))?;
        Ok(())
    }

    /// Reads a point by id.
    pub fn read_point(&self, id: &str) -> StoreResult<Point> {
        let path = self.point_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::PointNotFound {
                    collection: self.meta.name.clone(),
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(io_err(&path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupted {
            path,
            reason: e.to_string(),
        })
    }

    /// Deletes a point by id. Missing points are a not-found error.
    pub fn delete_point(&self, id: &str) -> StoreResult<()> {
        let path = self.point_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::PointNotFound {
                    collection: self.meta.name.clone(),
                    id: id.to_string(),
                })
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Counts point files without deserializing any payloads.
    pub fn count_points(&self) -> StoreResult<usize> {
        let points_dir = self.path.join(POINTS_DIR);
        if !points_dir.exists() {
            return Ok(0);
        }

        let count = fs::read_dir(&points_dir)
            .map_err(|e| io_err(&points_dir, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .count();
        Ok(count)
    }

    /// Removes the collection directory and everything in it.
    pub fn delete(self) -> StoreResult<()> {
        fs::remove_dir_all(&self.path).map_err(|e| io_err(&self.path, e))
    }
}

/// Collection names become directory names, so path-like names are rejected.
fn validate_name(name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        Some("name cannot be empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("name cannot contain path separators")
    } else if name.starts_with('.') {
        Some("name cannot start with a dot")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidCollectionName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Writes `bytes` to `dir/file` via a temp file in the same directory.
fn write_atomic(dir: &Path, file: &str, bytes: &[u8]) -> StoreResult<()> {
    let target = dir.join(file);
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_err(&target, e))?;
    tmp.persist(&target).map_err(|e| io_err(&target, e.error))?;
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
