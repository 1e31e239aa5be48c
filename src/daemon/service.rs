//! The daemon service: request surface over the store, index, cache, and
//! embedding pipeline.
//!
//! Queries hold a tracker guard for their whole scope, reuse the warm cache
//! entry for the project (loading on a miss), and run ANN search plus lazy
//! payload filtering through the store. Index builds run on a dedicated
//! background thread so long rebuilds never block request-serving threads;
//! a finished build invalidates the project's cache entry, and the next
//! query loads the fresh artifacts.

use crossbeam_channel::{Sender, bounded, unbounded};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Settings;
use crate::daemon::cache::{CacheEntry, WarmCache};
use crate::daemon::tracker::QueryTracker;
use crate::embedding::{EmbeddingPool, EmbeddingProvider, PipelineError, TaskId, VectorTask};
use crate::error::{ServiceError, ServiceResult};
use crate::index::{BuildOutcome, IndexError};
use crate::progress::{BuildStats, ProgressFn};
use crate::store::{
    Collection, Filter, Payload, Point, SearchHit, SearchParams, UpsertReport, VectorStore,
};

/// Results plus timing for one query.
#[derive(Debug)]
pub struct QueryResponse {
    pub results: Vec<SearchHit>,
    pub elapsed: Duration,
}

/// How an index request ended.
#[derive(Debug, PartialEq, Eq)]
pub enum IndexStatus {
    Completed,
    Cancelled,
}

/// Outcome of an index request.
#[derive(Debug)]
pub struct IndexResponse {
    pub status: IndexStatus,
    pub stats: Option<BuildStats>,
}

/// A chunk of text to embed and store: point id, text, payload.
#[derive(Debug, Clone)]
pub struct IndexItem {
    pub id: String,
    pub text: String,
    pub payload: Payload,
}

struct IndexJob {
    project: PathBuf,
    progress: Option<Arc<ProgressFn>>,
    reply: Sender<ServiceResult<IndexResponse>>,
}

/// Long-lived daemon state: tracker, warm cache, embedding pool, and the
/// background index worker. Dropping the service shuts all of them down.
pub struct DaemonService {
    settings: Settings,
    provider: Arc<dyn EmbeddingProvider>,
    pool: EmbeddingPool,
    tracker: Arc<QueryTracker>,
    cache: Arc<WarmCache>,
    job_tx: Option<Sender<IndexJob>>,
    index_worker: Option<JoinHandle<()>>,
}

impl DaemonService {
    /// Starts the service with its background workers.
    #[must_use]
    pub fn new(settings: Settings, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let tracker = QueryTracker::new();
        let cache = Arc::new(WarmCache::new(&settings.cache, Arc::clone(&tracker)));
        let pool = EmbeddingPool::from_config(Arc::clone(&provider), &settings.embedding);

        let (job_tx, job_rx) = unbounded::<IndexJob>();
        let worker_settings = settings.clone();
        let worker_tracker = Arc::clone(&tracker);
        let worker_cache = Arc::clone(&cache);

        let index_worker = std::thread::Builder::new()
            .name("index-worker".to_string())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let result = run_index_job(
                        &worker_settings,
                        &worker_tracker,
                        &worker_cache,
                        &job.project,
                        job.progress.as_deref(),
                    );
                    let _ = job.reply.send(result);
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn index worker: {e}"));

        info!("daemon service started");
        Self {
            settings,
            provider,
            pool,
            tracker,
            cache,
            job_tx: Some(job_tx),
            index_worker: Some(index_worker),
        }
    }

    /// Embeds the query text and searches the project's warm index.
    pub fn query(
        &self,
        project: &Path,
        query_text: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> ServiceResult<QueryResponse> {
        let embeddings = self.provider.embed(&[query_text.to_string()])?;
        let vector = embeddings
            .into_iter()
            .next()
            .ok_or(PipelineError::ResponseMismatch {
                expected: 1,
                actual: 0,
            })?;
        self.query_vector(project, &vector, limit, filter)
    }

    /// Searches with an already-computed query vector.
    pub fn query_vector(
        &self,
        project: &Path,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> ServiceResult<QueryResponse> {
        let _guard = self.tracker.track_query(project);
        let start = Instant::now();

        let entry = self.warm_entry(project)?;
        let store = self.store_for(project);
        let params = SearchParams {
            limit,
            filter,
            lazy_load: true,
            prefetch_limit: None,
        };

        let results =
            store.search_with_index(entry.collection(), entry.index(), query_vector, &params)?;

        Ok(QueryResponse {
            results,
            elapsed: start.elapsed(),
        })
    }

    /// Embeds texts through the worker pool and upserts the resulting
    /// points. Any pipeline failure fails the whole request; points are
    /// never written with placeholder vectors. Per-point validation
    /// rejections come back in the report so the caller sees exactly
    /// which points were dropped.
    pub fn embed_and_upsert(
        &self,
        project: &Path,
        items: Vec<IndexItem>,
    ) -> ServiceResult<UpsertReport> {
        let _guard = self.tracker.track_query(project);

        let store = self.store_for(project);
        let collection = &self.settings.storage.collection;
        store.create_collection(
            collection,
            self.settings.storage.vector_dim,
            self.settings.storage.distance_metric,
        )?;

        let mut tasks = Vec::with_capacity(items.len());
        let mut meta: Vec<(String, Payload)> = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            tasks.push(VectorTask::single(TaskId(i as u64), item.text));
            meta.push((item.id, item.payload));
        }

        let outputs = self.pool.run_all(tasks)?;
        let mut points = Vec::with_capacity(outputs.len());
        for output in outputs {
            let result = output.outcome?;
            let (id, payload) = meta[output.task_id.0 as usize].clone();
            points.push(Point::with_payload(
                id,
                result.embedding()?.to_vec(),
                payload,
            ));
        }

        let report = store.upsert_points(Some(collection), &points)?;
        for (id, error) in &report.rejected {
            warn!(point = %id, %error, "point rejected during upsert");
        }

        if self.settings.cache.invalidate_on_upsert {
            self.cache.invalidate(project);
        }

        Ok(report)
    }

    /// Requests an index rebuild on the background worker and waits for it.
    ///
    /// Other threads keep serving queries against the old index while the
    /// build runs; the swap happens on completion.
    pub fn index(
        &self,
        project: &Path,
        progress: Option<Arc<ProgressFn>>,
    ) -> ServiceResult<IndexResponse> {
        let (reply_tx, reply_rx) = bounded(1);
        let job = IndexJob {
            project: project.to_path_buf(),
            progress,
            reply: reply_tx,
        };

        self.job_tx
            .as_ref()
            .ok_or(ServiceError::IndexWorkerGone)?
            .send(job)
            .map_err(|_| ServiceError::IndexWorkerGone)?;

        reply_rx.recv().map_err(|_| ServiceError::IndexWorkerGone)?
    }

    /// Query tracker handle, shared with the cache's eviction worker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<QueryTracker> {
        &self.tracker
    }

    /// Warm cache handle.
    #[must_use]
    pub fn cache(&self) -> &WarmCache {
        &self.cache
    }

    fn store_for(&self, project: &Path) -> VectorStore {
        VectorStore::from_config(
            self.settings.project_storage(project),
            &self.settings.storage,
        )
    }

    fn warm_entry(&self, project: &Path) -> ServiceResult<Arc<CacheEntry>> {
        let base = self.settings.project_storage(project);
        let collection_name = self.settings.storage.collection.clone();
        let project_buf = project.to_path_buf();

        self.cache.get_or_load(project, move || {
            let collection = Collection::open(&base, &collection_name)?;
            let index = match crate::index::AnnIndex::load(collection.path()) {
                Ok(index) => index,
                Err(IndexError::NotBuilt { .. }) => {
                    return Err(ServiceError::NoIndex {
                        project: project_buf,
                    });
                }
                Err(e) => return Err(e.into()),
            };
            Ok(CacheEntry::new(collection, index))
        })
    }
}

impl Drop for DaemonService {
    fn drop(&mut self) {
        // Closing the job channel stops the worker after its current build
        self.job_tx.take();
        if let Some(worker) = self.index_worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_index_job(
    settings: &Settings,
    tracker: &Arc<QueryTracker>,
    cache: &WarmCache,
    project: &Path,
    progress: Option<&ProgressFn>,
) -> ServiceResult<IndexResponse> {
    let _guard = tracker.track_query(project);

    let store = VectorStore::from_config(settings.project_storage(project), &settings.storage);
    let collection = &settings.storage.collection;
    store.create_collection(
        collection,
        settings.storage.vector_dim,
        settings.storage.distance_metric,
    )?;

    match store.rebuild_index(Some(collection), progress)? {
        BuildOutcome::Complete { stats, .. } => {
            // The old entry points at replaced artifacts; drop it so the
            // next access loads the new index
            cache.invalidate(project);
            info!(project = %project.display(), points = stats.points_indexed, "reindex complete");
            Ok(IndexResponse {
                status: IndexStatus::Completed,
                stats: Some(stats),
            })
        }
        BuildOutcome::Cancelled => {
            info!(project = %project.display(), "reindex cancelled");
            Ok(IndexResponse {
                status: IndexStatus::Cancelled,
                stats: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::PipelineResult;
    use serde_json::json;
    use tempfile::TempDir;

    /// Embeds text deterministically into a 4-dim vector keyed on the
    /// first word, so related texts land near each other. "nan" texts get
    /// a NaN element, exercising the write-time validation path.
    struct StubProvider;

    impl EmbeddingProvider for StubProvider {
        fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| match text.split_whitespace().next() {
                    Some("alpha") => vec![1.0, 0.0, 0.0, 0.0],
                    Some("beta") => vec![0.0, 1.0, 0.0, 0.0],
                    Some("nan") => vec![f32::NAN, 0.0, 0.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0, 0.0],
                })
                .collect())
        }
    }

    /// Embeds the leading integer of each text into the first element, so
    /// every request's vectors are attributable to the caller that sent it.
    struct TaggedProvider;

    impl EmbeddingProvider for TaggedProvider {
        fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let tag: f32 = text
                        .split_whitespace()
                        .next()
                        .and_then(|word| word.parse().ok())
                        .unwrap_or(0.0);
                    vec![tag, 1.0, 0.0, 0.0]
                })
                .collect())
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.storage.vector_dim = 4;
        settings.embedding.workers = 2;
        settings.cache.eviction_interval_secs = 3600;
        settings
    }

    fn item(id: &str, text: &str) -> IndexItem {
        let mut payload = Payload::new();
        payload.insert("content".to_string(), json!(text));
        IndexItem {
            id: id.to_string(),
            text: text.to_string(),
            payload,
        }
    }

    #[test]
    fn test_full_pipeline_roundtrip() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        let report = service
            .embed_and_upsert(
                project,
                vec![
                    item("p1", "alpha function"),
                    item("p2", "beta helper"),
                    item("p3", "gamma util"),
                ],
            )
            .unwrap();
        assert_eq!(report.written, 3);
        assert!(report.rejected.is_empty());

        let response = service.index(project, None).unwrap();
        assert_eq!(response.status, IndexStatus::Completed);
        assert_eq!(response.stats.unwrap().points_indexed, 3);

        let response = service.query(project, "alpha query", 1, None).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "p1");
    }

    #[test]
    fn test_query_without_index_is_no_index() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));

        service
            .embed_and_upsert(dir.path(), vec![item("p1", "alpha")])
            .unwrap();

        let err = service.query(dir.path(), "alpha", 1, None).unwrap_err();
        assert!(matches!(err, ServiceError::NoIndex { .. }));
    }

    #[test]
    fn test_reindex_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        service
            .embed_and_upsert(project, vec![item("p1", "alpha")])
            .unwrap();
        service.index(project, None).unwrap();

        // Warm the cache, then add a point and reindex
        service.query(project, "alpha", 1, None).unwrap();
        assert!(service.cache().contains(project));

        service
            .embed_and_upsert(project, vec![item("p2", "beta")])
            .unwrap();
        service.index(project, None).unwrap();
        assert!(!service.cache().contains(project));

        let response = service.query(project, "beta", 1, None).unwrap();
        assert_eq!(response.results[0].id, "p2");
    }

    #[test]
    fn test_stale_reads_until_rebuild() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        service
            .embed_and_upsert(project, vec![item("p1", "alpha")])
            .unwrap();
        service.index(project, None).unwrap();
        service.query(project, "alpha", 1, None).unwrap();

        // A plain upsert leaves the warm entry in place; the new point is
        // invisible to ANN search until the next rebuild
        service
            .embed_and_upsert(project, vec![item("p2", "beta")])
            .unwrap();
        assert!(service.cache().contains(project));
        let response = service.query(project, "beta", 5, None).unwrap();
        assert!(response.results.iter().all(|hit| hit.id != "p2"));

        service.index(project, None).unwrap();
        let response = service.query(project, "beta", 5, None).unwrap();
        assert!(response.results.iter().any(|hit| hit.id == "p2"));
    }

    #[test]
    fn test_query_with_filter() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        service
            .embed_and_upsert(
                project,
                vec![item("p1", "alpha one"), item("p2", "alpha two")],
            )
            .unwrap();
        service.index(project, None).unwrap();

        let filter = Filter::must(vec![crate::store::Condition::value(
            "content",
            json!("alpha two"),
        )]);
        let response = service
            .query(project, "alpha query", 5, Some(&filter))
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "p2");
    }

    #[test]
    fn test_cancelled_index_leaves_no_status_change() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        service
            .embed_and_upsert(project, vec![item("p1", "alpha")])
            .unwrap();

        let cancel: Arc<ProgressFn> = Arc::new(|_p| std::ops::ControlFlow::Break(()));
        let response = service.index(project, Some(cancel)).unwrap();
        assert_eq!(response.status, IndexStatus::Cancelled);

        // No index was swapped in
        assert!(matches!(
            service.query(project, "alpha", 1, None),
            Err(ServiceError::NoIndex { .. })
        ));
    }

    #[test]
    fn test_upsert_rejections_surfaced_to_caller() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        let report = service
            .embed_and_upsert(
                project,
                vec![item("good", "alpha function"), item("bad", "nan text")],
            )
            .unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "bad");

        let store = service.store_for(project);
        assert!(store.get_point(Some("code"), "good").is_ok());
        assert!(store.get_point(Some("code"), "bad").is_err());
    }

    #[test]
    fn test_concurrent_embed_and_upsert_keeps_requests_separate() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(DaemonService::new(test_settings(), Arc::new(TaggedProvider)));
        let project = dir.path().to_path_buf();

        // Every caller numbers its pool tasks 0..n; only the embedded tag
        // distinguishes callers, so a cross-delivered output would pair a
        // point id with another request's vector
        let handles: Vec<_> = (0..4)
            .map(|caller: u32| {
                let service = Arc::clone(&service);
                let project = project.clone();
                std::thread::spawn(move || {
                    let items: Vec<IndexItem> = (0..8)
                        .map(|i| {
                            item(&format!("c{caller}-p{i}"), &format!("{} chunk {i}", caller + 1))
                        })
                        .collect();
                    let report = service.embed_and_upsert(&project, items).unwrap();
                    assert_eq!(report.written, 8);
                    assert!(report.rejected.is_empty());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = service.store_for(&project);
        for caller in 0..4u32 {
            for i in 0..8 {
                let point = store
                    .get_point(Some("code"), &format!("c{caller}-p{i}"))
                    .unwrap();
                assert_eq!(point.vector[0], (caller + 1) as f32);
            }
        }
    }

    #[test]
    fn test_ref_count_zero_after_operations() {
        let dir = TempDir::new().unwrap();
        let service = DaemonService::new(test_settings(), Arc::new(StubProvider));
        let project = dir.path();

        service
            .embed_and_upsert(project, vec![item("p1", "alpha")])
            .unwrap();
        service.index(project, None).unwrap();
        service.query(project, "alpha", 1, None).unwrap();
        let _ = service.query(project, "alpha", 0, None);

        assert_eq!(service.tracker().get_ref_count(project), 0);
    }
}
