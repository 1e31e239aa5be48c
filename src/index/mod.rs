//! Approximate nearest-neighbor index over a collection's vectors.
//!
//! The index is a derived, rebuildable artifact: the per-point files in the
//! collection are the source of truth, and the artifacts under
//! `<collection>/index/` can be deleted and rebuilt at any time. Builds are
//! always full scans; there is no per-point incremental insertion, so points
//! upserted after the last build stay invisible to ANN search until the next
//! rebuild.
//!
//! # Architecture
//! The index uses IVFFlat (inverted file with flat vectors): K-means
//! clustering partitions the vectors, searches probe the nearest few
//! centroids, and candidate vectors are scored exactly from a packed
//! memory-mapped segment file. Results are a high-recall estimate, not exact
//! nearest neighbors.

mod clustering;
mod engine;
mod storage;
mod types;

pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, cosine_similarity, kmeans_clustering,
};
pub use engine::{AnnIndex, BuildOutcome, INDEX_DIR, rebuild_cluster_count};
pub use storage::VectorSegment;
pub use types::{ClusterId, DistanceMetric, IndexError, IndexResult, VectorDimension, VectorId};
