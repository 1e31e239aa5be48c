//! Embedding pipeline: turns text chunks into vectors via a remote provider.
//!
//! A fixed-size worker pool consumes [`VectorTask`]s. Each task's chunks are
//! greedily grouped into provider requests that stay under the per-request
//! token ceiling, and the resulting embeddings come back concatenated in the
//! original chunk order. Tasks complete in no particular order; callers
//! track results by task id.

mod batching;
mod pool;
mod provider;
mod task;

use thiserror::Error;

pub use batching::{estimate_tokens, split_by_token_budget};
pub use pool::{EmbeddingPool, TaskOutput};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use task::{TaskId, VectorResult, VectorTask};

/// Errors surfaced by the embedding pipeline.
///
/// Provider failure modes are distinct variants, never coerced into one
/// another or into placeholder vectors. Transient classes (timeout, 5xx)
/// are retried with backoff; a null embedding is a data problem and fails
/// the batch immediately.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "Embedding provider returned HTTP {status}: {body}\nSuggestion: Check the endpoint, model name, and API key"
    )]
    HttpStatus { status: u16, body: String },

    #[error(
        "Embedding request timed out after {seconds}s\nSuggestion: Increase embedding.request_timeout_secs or check network connectivity"
    )]
    Timeout { seconds: u64 },

    #[error("Failed to connect to embedding provider: {0}\nSuggestion: Check the endpoint URL and network connectivity")]
    Connection(String),

    #[error(
        "Provider returned a null embedding for item {item} (request batch {batch})\nSuggestion: This is a data problem, not a transient fault; inspect the input text"
    )]
    NullEmbedding {
        /// Index of the provider request within the task.
        batch: usize,
        /// Position of the failing text within the whole task.
        item: usize,
    },

    #[error(
        "Provider returned {actual} embeddings for {expected} inputs\nSuggestion: The provider response is malformed; do not store these results"
    )]
    ResponseMismatch { expected: usize, actual: usize },

    #[error(
        "Single-item accessor called on a batch of {size} items\nSuggestion: Use the batch accessor instead"
    )]
    NotSingleItem { size: usize },

    #[error(
        "API key environment variable '{env}' is not set\nSuggestion: Export the key or change embedding.api_key_env"
    )]
    MissingApiKey { env: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error(
        "Embedding worker pool is no longer running\nSuggestion: The pool was shut down; create a new one"
    )]
    WorkerGone,
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
