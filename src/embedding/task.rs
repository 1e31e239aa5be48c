//! Vector tasks and results.
//!
//! A task carries one or more text chunks plus opaque caller metadata; the
//! matching result carries one embedding per chunk, in the same order.
//! Single-item accessors exist for the common one-chunk case but fail
//! loudly on batches rather than silently returning the first element.

use crate::embedding::{PipelineError, PipelineResult};
use crate::store::Payload;

/// Caller-assigned task identifier; results are tracked by this, not by
/// completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A batch of text chunks to embed.
#[derive(Debug, Clone)]
pub struct VectorTask {
    pub id: TaskId,

    /// Immutable ordered chunk sequence; results come back in this order.
    pub chunks: Vec<String>,

    /// Opaque caller metadata, passed through to the result untouched.
    pub metadata: Payload,
}

impl VectorTask {
    /// Single-chunk task.
    pub fn single(id: TaskId, text: impl Into<String>) -> Self {
        Self {
            id,
            chunks: vec![text.into()],
            metadata: Payload::new(),
        }
    }

    /// Multi-chunk task.
    pub fn batch(id: TaskId, chunks: Vec<String>) -> Self {
        Self {
            id,
            chunks,
            metadata: Payload::new(),
        }
    }

    /// Attaches caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// The single chunk of a one-item task.
    ///
    /// Errors on a batch instead of truncating to the first chunk.
    pub fn text(&self) -> PipelineResult<&str> {
        match self.chunks.as_slice() {
            [only] => Ok(only),
            _ => Err(PipelineError::NotSingleItem {
                size: self.chunks.len(),
            }),
        }
    }
}

/// Embeddings for one completed task, in the task's chunk order.
#[derive(Debug, Clone)]
pub struct VectorResult {
    pub task_id: TaskId,
    pub embeddings: Vec<Vec<f32>>,
    pub metadata: Payload,
}

impl VectorResult {
    /// The single embedding of a one-item result.
    ///
    /// Errors on a batch instead of truncating to the first embedding.
    pub fn embedding(&self) -> PipelineResult<&[f32]> {
        match self.embeddings.as_slice() {
            [only] => Ok(only),
            _ => Err(PipelineError::NotSingleItem {
                size: self.embeddings.len(),
            }),
        }
    }
}
