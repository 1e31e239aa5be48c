//! Type-safe wrappers and core types for the ANN index.
//!
//! This module provides newtypes and error types following the project's
//! strict type safety guidelines. Internal graph ids are never zero, which
//! keeps uninitialized state unrepresentable.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::PathBuf;
use thiserror::Error;

/// Type-safe wrapper for internal vector ids.
///
/// Vector ids are assigned densely (1-based) during a rebuild; the index owns
/// the mapping from `VectorId` back to the point's string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(NonZeroU32);

impl VectorId {
    /// Creates a new `VectorId` from a non-zero u32.
    ///
    /// Returns `None` if the provided id is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Creates a `VectorId` from a zero-based position in the segment.
    #[must_use]
    pub fn from_position(pos: usize) -> Self {
        Self(NonZeroU32::new(pos as u32 + 1).expect("position + 1 is never zero"))
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Zero-based position of this vector in the packed segment.
    #[must_use]
    pub fn position(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Type-safe wrapper for cluster ids in IVFFlat indexing.
///
/// Clusters are identified by non-zero ids to prevent confusion with
/// uninitialized or error states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// Creates a new `ClusterId` from a non-zero u32.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Creates a new `ClusterId`, panicking if zero.
    ///
    /// # Panics
    /// Panics if `id` is zero. Use `new()` for fallible construction.
    #[must_use]
    pub fn new_unchecked(id: u32) -> Self {
        Self(NonZeroU32::new(id).expect("ClusterId cannot be zero"))
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Zero-based index of this cluster in the centroid table.
    #[must_use]
    pub fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent dimension
/// mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Distance metric configured per collection.
///
/// Scoring follows a single convention across metrics: higher score means a
/// better match. Euclidean distance is therefore negated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl DistanceMetric {
    /// Score two vectors of the same dimension. Higher is better.
    #[must_use]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vectors must have same dimension");
        match self {
            Self::Cosine => super::clustering::cosine_similarity(a, b),
            Self::Dot => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
            Self::Euclidean => {
                let dist_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                -dist_sq.sqrt()
            }
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::Dot => write!(f, "dot"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Errors that can occur during ANN index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error("Invalid index format at '{path}': {reason}\nSuggestion: Delete the index directory and rebuild")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error(
        "Invalid index version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with the current version"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error(
        "No index built at '{}'\nSuggestion: Run a rebuild before querying", path.display()
    )]
    NotBuilt { path: PathBuf },

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering"
    )]
    ClusteringFailed(String),

    #[error(
        "Unreadable point file '{}': {reason}\nSuggestion: The file may be damaged; re-upsert the point", path.display()
    )]
    UnreadablePoint { path: PathBuf, reason: String },
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
