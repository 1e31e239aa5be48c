//! Embedded semantic-search storage engine: per-project collections of
//! embedding vectors with payload filtering, an IVFFlat ANN index, a
//! token-budget-aware embedding pipeline, and a daemon-resident warm cache
//! with ref-count-gated eviction.

pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod index;
pub mod logging;
pub mod progress;
pub mod store;

// Explicit exports for better API clarity
pub use config::Settings;
pub use daemon::{DaemonService, IndexItem, QueryResponse, QueryTracker, WarmCache};
pub use embedding::{
    EmbeddingPool, EmbeddingProvider, HttpEmbeddingProvider, PipelineError, PipelineResult,
    VectorResult, VectorTask,
};
pub use error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use index::{AnnIndex, BuildOutcome, DistanceMetric, IndexError, IndexResult};
pub use progress::{BuildStats, Progress, ProgressFn};
pub use store::{
    Condition, Filter, Payload, Point, SearchHit, SearchParams, UpsertReport, VectorStore,
};
