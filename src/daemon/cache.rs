//! Warm cache: per-project resident index state with TTL eviction.
//!
//! One [`CacheEntry`] per actively-used project keeps a loaded ANN index
//! and its point-path table in memory across requests. A background worker
//! evicts entries idle beyond the TTL, but only when the query tracker
//! reports zero in-flight readers; a referenced entry is deferred to the
//! next cycle, never forced out. Invalidation (after a reindex) drops the
//! entry synchronously so the next access loads fresh artifacts.

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::daemon::tracker::QueryTracker;
use crate::error::ServiceResult;
use crate::index::AnnIndex;
use crate::store::Collection;

/// Resident state for one project: the loaded index handle plus a
/// point-path arena aligned with the index's internal vector order.
pub struct CacheEntry {
    collection: Collection,
    index: Arc<AnnIndex>,
    point_paths: Vec<PathBuf>,
    loaded_at: Instant,
    last_access: Mutex<Instant>,
}

impl CacheEntry {
    /// Builds an entry from an opened collection and a loaded index.
    #[must_use]
    pub fn new(collection: Collection, index: AnnIndex) -> Self {
        let point_paths = index
            .point_ids()
            .iter()
            .map(|id| collection.point_path(id))
            .collect();

        Self {
            collection,
            index: Arc::new(index),
            point_paths,
            loaded_at: Instant::now(),
            last_access: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    #[must_use]
    pub fn index(&self) -> &Arc<AnnIndex> {
        &self.index
    }

    /// File path for the vector at a given internal position.
    #[must_use]
    pub fn point_path(&self, position: usize) -> Option<&Path> {
        self.point_paths.get(position).map(PathBuf::as_path)
    }

    /// Time since this entry was loaded.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Time since the last access.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }
}

struct CacheInner {
    entries: DashMap<PathBuf, Arc<CacheEntry>>,
    tracker: Arc<QueryTracker>,
    ttl: Duration,
}

impl CacheInner {
    /// Evicts idle, unreferenced entries; returns how many were dropped.
    ///
    /// The tracker count is a gate, re-checked under the shard lock in
    /// `remove_if`, so an eviction never races a reader that grabbed the
    /// entry between the scan and the removal.
    fn evict_idle(&self) -> usize {
        let candidates: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|e| e.value().idle_for() >= self.ttl)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for path in candidates {
            let removed = self.entries.remove_if(&path, |key, entry| {
                self.tracker.get_ref_count(key) == 0 && entry.idle_for() >= self.ttl
            });
            if removed.is_some() {
                debug!(project = %path.display(), "evicted idle cache entry");
                evicted += 1;
            }
        }
        evicted
    }
}

/// Per-project warm cache with a background eviction worker.
///
/// Dropping the cache stops the worker.
pub struct WarmCache {
    inner: Arc<CacheInner>,
    shutdown_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl WarmCache {
    /// Creates the cache and starts its eviction worker.
    #[must_use]
    pub fn new(config: &CacheConfig, tracker: Arc<QueryTracker>) -> Self {
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            tracker,
            ttl: config.ttl(),
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let worker = spawn_eviction_worker(
            Arc::clone(&inner),
            shutdown_rx,
            config.eviction_interval(),
        );

        info!(
            ttl_secs = config.ttl_secs,
            interval_secs = config.eviction_interval_secs,
            "warm cache started"
        );

        Self {
            inner,
            shutdown_tx,
            worker: Some(worker),
        }
    }

    /// Returns the cached entry for a project, loading it on a miss.
    ///
    /// The shard lock serializes load, invalidate, and evict for the same
    /// path, so two concurrent misses run the loader once.
    pub fn get_or_load<F>(&self, project: &Path, loader: F) -> ServiceResult<Arc<CacheEntry>>
    where
        F: FnOnce() -> ServiceResult<CacheEntry>,
    {
        match self.inner.entries.entry(project.to_path_buf()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                entry.touch();
                Ok(Arc::clone(entry))
            }
            Entry::Vacant(vacant) => {
                debug!(project = %project.display(), "cache miss, loading entry");
                let entry = Arc::new(loader()?);
                vacant.insert(Arc::clone(&entry));
                Ok(entry)
            }
        }
    }

    /// Drops the entry for a project so the next access loads fresh.
    ///
    /// Readers holding the `Arc` keep using the old entry until they
    /// finish; only the map slot is cleared.
    pub fn invalidate(&self, project: &Path) -> bool {
        let removed = self.inner.entries.remove(project).is_some();
        if removed {
            debug!(project = %project.display(), "cache entry invalidated");
        }
        removed
    }

    /// True when an entry is resident for the project.
    #[must_use]
    pub fn contains(&self, project: &Path) -> bool {
        self.inner.entries.contains_key(project)
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Runs one eviction pass immediately; the background worker does the
    /// same on its interval.
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }
}

impl Drop for WarmCache {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn spawn_eviction_worker(
    inner: Arc<CacheInner>,
    shutdown_rx: Receiver<()>,
    interval: Duration,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("cache-eviction".to_string())
        .spawn(move || {
            // recv_timeout doubles as the tick; a message or a closed
            // channel both mean shutdown
            while shutdown_rx.recv_timeout(interval)
                == Err(crossbeam_channel::RecvTimeoutError::Timeout)
            {
                let evicted = inner.evict_idle();
                if evicted > 0 {
                    debug!(evicted, "eviction pass complete");
                }
            }
            debug!("eviction worker exiting");
        })
        .unwrap_or_else(|e| panic!("failed to spawn eviction worker: {e}"))
}
