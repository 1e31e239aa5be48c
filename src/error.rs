//! Error types for the semantic-search storage engine.
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Validation errors and
//! not-found errors are deliberately distinct variants so callers can tell
//! "doesn't exist" apart from "malformed".

use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::PipelineError;
use crate::index::IndexError;

/// Main error type for vector store operations.
///
/// Every rejected operation names the specific offending id, path, or field.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Not-found errors
    #[error(
        "Collection '{name}' not found\nSuggestion: Create the collection before writing or searching it"
    )]
    CollectionNotFound { name: String },

    #[error("Point '{id}' not found in collection '{collection}'")]
    PointNotFound { collection: String, id: String },

    #[error("No collections exist yet\nSuggestion: Create a collection before upserting or searching")]
    NoCollections,

    /// Validation errors
    #[error(
        "Collection '{name}' already exists with dimension {existing}, requested {requested}\nSuggestion: Delete the collection first or keep the existing dimension"
    )]
    CollectionDimensionConflict {
        name: String,
        existing: usize,
        requested: usize,
    },

    #[error(
        "Ambiguous collection: multiple collections exist ({candidates:?})\nSuggestion: Pass an explicit collection name to disambiguate"
    )]
    AmbiguousCollection { candidates: Vec<String> },

    #[error(
        "Point '{id}' has vector dimension {actual}, collection '{collection}' expects {expected}\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch {
        id: String,
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error(
        "Point '{id}' has a non-finite vector element at index {element}\nSuggestion: Every vector element must be a finite real number; null and NaN are rejected at write time"
    )]
    InvalidVectorElement { id: String, element: usize },

    #[error("Invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: &'static str },

    /// Storage I/O errors
    #[error("I/O error at '{path}': {source}\nSuggestion: Check disk space and file permissions")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Corrupted data at '{path}': {reason}\nSuggestion: The file may be damaged; rebuild the collection"
    )]
    Corrupted { path: PathBuf, reason: String },

    /// ANN index errors bubbling up through search
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

impl StoreError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::CollectionNotFound { .. } => "COLLECTION_NOT_FOUND",
            Self::PointNotFound { .. } => "POINT_NOT_FOUND",
            Self::NoCollections => "NO_COLLECTIONS",
            Self::CollectionDimensionConflict { .. } => "COLLECTION_DIMENSION_CONFLICT",
            Self::AmbiguousCollection { .. } => "AMBIGUOUS_COLLECTION",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidVectorElement { .. } => "INVALID_VECTOR_ELEMENT",
            Self::InvalidCollectionName { .. } => "INVALID_COLLECTION_NAME",
            Self::Io { .. } => "IO_ERROR",
            Self::Corrupted { .. } => "CORRUPTED",
            Self::Index(_) => "INDEX_ERROR",
        }
    }

    /// True for errors in the validation class, as opposed to not-found or
    /// I/O failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::CollectionDimensionConflict { .. }
                | Self::AmbiguousCollection { .. }
                | Self::DimensionMismatch { .. }
                | Self::InvalidVectorElement { .. }
                | Self::InvalidCollectionName { .. }
        )
    }
}

/// Errors surfaced by the daemon service layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Embedding pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(
        "No index built for project '{}'\nSuggestion: Run an index operation before querying", project.display()
    )]
    NoIndex { project: PathBuf },

    #[error(
        "Background index worker is no longer running\nSuggestion: The daemon may be shutting down; retry after restart"
    )]
    IndexWorkerGone,
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for daemon service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
