//! The vector store: collection CRUD, upserts, and similarity search.
//!
//! Search orchestration is the interesting part: the ANN index produces an
//! ordered candidate list, and the store loads point files lazily in rank
//! order, applying payload filters and stopping as soon as `limit` matches
//! are collected. The store never widens the candidate window on its own; a
//! caller that needs more matches raises `prefetch_limit` explicitly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::{AnnIndex, BuildOutcome, DistanceMetric, VectorDimension};
use crate::progress::ProgressFn;
use crate::store::collection::Collection;
use crate::store::filter::Filter;
use crate::store::payload::Payload;
use crate::store::point::Point;

/// Default prefetch multiplier when no explicit `prefetch_limit` is given.
const DEFAULT_PREFETCH_FACTOR: usize = 4;

/// One search result: point id, similarity score, and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Search tuning knobs beyond the query vector itself.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    /// Maximum number of matches to return.
    pub limit: usize,

    /// Payload filter; `None` accepts every candidate.
    pub filter: Option<&'a Filter>,

    /// Lazy: load candidates one at a time in rank order, stopping at
    /// `limit` matches. Eager: load the whole candidate window first.
    pub lazy_load: bool,

    /// Candidate window size; defaults to `limit * prefetch_factor`.
    pub prefetch_limit: Option<usize>,
}

impl<'a> SearchParams<'a> {
    /// Lazy search with no filter.
    #[must_use]
    pub fn top_k(limit: usize) -> Self {
        Self {
            limit,
            filter: None,
            lazy_load: true,
            prefetch_limit: None,
        }
    }
}

/// Outcome of a batch upsert with partial (per-point) semantics.
#[derive(Debug, Default)]
pub struct UpsertReport {
    /// Number of points written.
    pub written: usize,

    /// Rejected points with the validation error for each.
    pub rejected: Vec<(String, StoreError)>,
}

/// Durable, filterable, lazily-loadable storage of points per collection.
pub struct VectorStore {
    base_path: PathBuf,
    prefetch_factor: usize,
    /// Point files loaded since construction; cheap observability for
    /// verifying lazy-load behavior.
    points_loaded: AtomicU64,
}

impl VectorStore {
    /// Opens a store rooted at `base_path`. The directory is created on the
    /// first collection create, not here.
    #[must_use]
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            prefetch_factor: DEFAULT_PREFETCH_FACTOR,
            points_loaded: AtomicU64::new(0),
        }
    }

    /// Opens a store with tuning taken from configuration.
    #[must_use]
    pub fn from_config(base_path: PathBuf, config: &StorageConfig) -> Self {
        Self {
            base_path,
            prefetch_factor: config.prefetch_factor.max(1),
            points_loaded: AtomicU64::new(0),
        }
    }

    /// Store root directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Total point files loaded by this store instance.
    #[must_use]
    pub fn points_loaded(&self) -> u64 {
        self.points_loaded.load(Ordering::Relaxed)
    }

    /// Creates a collection, failing on a dimension conflict with an
    /// existing collection of the same name.
    pub fn create_collection(
        &self,
        name: &str,
        vector_dim: usize,
        distance_metric: DistanceMetric,
    ) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).map_err(|e| StoreError::Io {
            path: self.base_path.clone(),
            source: e,
        })?;
        Collection::create(&self.base_path, name, vector_dim, distance_metric)?;
        Ok(())
    }

    /// Deletes a collection and all its points and index artifacts.
    pub fn delete_collection(&self, name: &str) -> StoreResult<()> {
        Collection::open(&self.base_path, name)?.delete()
    }

    /// True when the named collection exists.
    #[must_use]
    pub fn collection_exists(&self, name: &str) -> bool {
        Collection::exists(&self.base_path, name)
    }

    /// Names of all collections under the store root, sorted.
    pub fn list_collections(&self) -> StoreResult<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = fs::read_dir(&self.base_path)
            .map_err(|e| StoreError::Io {
                path: self.base_path.clone(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| Collection::exists(&self.base_path, name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolves an optional collection name.
    ///
    /// `None` is sugar for "the only collection": with exactly one
    /// collection it resolves to that one; with several, the error names
    /// every candidate so the caller can disambiguate. Ambiguity never
    /// resolves implicitly to the first collection.
    pub fn resolve_collection(&self, name: Option<&str>) -> StoreResult<String> {
        if let Some(name) = name {
            return Ok(name.to_string());
        }

        let mut candidates = self.list_collections()?;
        match candidates.len() {
            0 => Err(StoreError::NoCollections),
            1 => Ok(candidates.remove(0)),
            _ => Err(StoreError::AmbiguousCollection { candidates }),
        }
    }

    /// Fast point count for a collection.
    pub fn count_points(&self, name: Option<&str>) -> StoreResult<usize> {
        let name = self.resolve_collection(name)?;
        Collection::open(&self.base_path, &name)?.count_points()
    }

    /// Upserts points with partial semantics: each invalid point is
    /// rejected individually and the rest are written.
    pub fn upsert_points(
        &self,
        collection_name: Option<&str>,
        points: &[Point],
    ) -> StoreResult<UpsertReport> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        let dim = collection.meta().vector_dim;

        let mut report = UpsertReport::default();
        for point in points {
            match point
                .validate(&name, dim)
                .and_then(|()| collection.write_point(point))
            {
                Ok(()) => report.written += 1,
                Err(e) => report.rejected.push((point.id.clone(), e)),
            }
        }

        debug!(
            collection = %name,
            written = report.written,
            rejected = report.rejected.len(),
            "upsert complete"
        );
        Ok(report)
    }

    /// Upserts with all-or-nothing semantics: the first invalid point fails
    /// the whole batch and nothing is written.
    pub fn upsert_points_strict(
        &self,
        collection_name: Option<&str>,
        points: &[Point],
    ) -> StoreResult<usize> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        let dim = collection.meta().vector_dim;

        for point in points {
            point.validate(&name, dim)?;
        }
        for point in points {
            collection.write_point(point)?;
        }
        Ok(points.len())
    }

    /// Fetches a single point by id.
    pub fn get_point(&self, collection_name: Option<&str>, id: &str) -> StoreResult<Point> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        self.load_point(&collection, id)
    }

    /// Deletes a single point by id.
    pub fn delete_point(&self, collection_name: Option<&str>, id: &str) -> StoreResult<()> {
        let name = self.resolve_collection(collection_name)?;
        Collection::open(&self.base_path, &name)?.delete_point(id)
    }

    /// Rebuilds the ANN index for a collection from a full point scan.
    pub fn rebuild_index(
        &self,
        collection_name: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> StoreResult<BuildOutcome> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        let dim = VectorDimension::new(collection.meta().vector_dim)?;

        let outcome = AnnIndex::rebuild(
            collection.path(),
            dim,
            collection.meta().distance_metric,
            progress,
        )?;
        Ok(outcome)
    }

    /// Loads previously-built index artifacts for a collection.
    pub fn load_index(&self, collection_name: Option<&str>) -> StoreResult<AnnIndex> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        Ok(AnnIndex::load(collection.path())?)
    }

    /// Similarity search; loads the index from disk per call.
    ///
    /// Long-lived callers should hold the index and use
    /// [`Self::search_with_index`] instead.
    pub fn search(
        &self,
        collection_name: Option<&str>,
        query_vector: &[f32],
        params: &SearchParams<'_>,
    ) -> StoreResult<Vec<SearchHit>> {
        let name = self.resolve_collection(collection_name)?;
        let collection = Collection::open(&self.base_path, &name)?;
        let index = AnnIndex::load(collection.path())?;
        self.search_with_index(&collection, &index, query_vector, params)
    }

    /// Similarity search against an already-loaded index.
    ///
    /// Candidates come back from the index best-first; the store loads
    /// point files and applies the payload filter. With `lazy_load` the
    /// scan stops as soon as `limit` matches exist, so filter-friendly
    /// queries touch far fewer files than the candidate window. A partial
    /// result is returned as-is when the window runs dry.
    pub fn search_with_index(
        &self,
        collection: &Collection,
        index: &AnnIndex,
        query_vector: &[f32],
        params: &SearchParams<'_>,
    ) -> StoreResult<Vec<SearchHit>> {
        let prefetch = params
            .prefetch_limit
            .unwrap_or(params.limit * self.prefetch_factor)
            .max(params.limit);

        let candidates = index.query(query_vector, prefetch)?;
        let mut hits = Vec::with_capacity(params.limit.min(candidates.len()));

        if params.lazy_load {
            for (id, score) in candidates {
                if hits.len() >= params.limit {
                    break;
                }
                let point = match self.load_point(collection, &id) {
                    Ok(point) => point,
                    // The index can briefly list a point deleted since the
                    // last rebuild; skip it
                    Err(StoreError::PointNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                if accepts(params.filter, &point.payload) {
                    hits.push(SearchHit {
                        id,
                        score,
                        payload: point.payload,
                    });
                }
            }
        } else {
            let mut loaded = Vec::with_capacity(candidates.len());
            for (id, score) in candidates {
                match self.load_point(collection, &id) {
                    Ok(point) => loaded.push((id, score, point)),
                    Err(StoreError::PointNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            for (id, score, point) in loaded {
                if hits.len() >= params.limit {
                    break;
                }
                if accepts(params.filter, &point.payload) {
                    hits.push(SearchHit {
                        id,
                        score,
                        payload: point.payload,
                    });
                }
            }
        }

        Ok(hits)
    }

    fn load_point(&self, collection: &Collection, id: &str) -> StoreResult<Point> {
        let point = collection.read_point(id)?;
        self.points_loaded.fetch_add(1, Ordering::Relaxed);
        Ok(point)
    }
}

fn accepts(filter: Option<&Filter>, payload: &Payload) -> bool {
    filter.is_none_or(|f| f.matches(payload))
}
