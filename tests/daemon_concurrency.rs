//! Concurrency behavior of the query tracker and warm cache.

use quiver::config::CacheConfig;
use quiver::daemon::{CacheEntry, QueryTracker, WarmCache};
use quiver::index::{AnnIndex, BuildOutcome, DistanceMetric, VectorDimension};
use quiver::store::{Collection, Point};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn load_entry(dir: &Path) -> CacheEntry {
    let collection = match Collection::open(dir, "code") {
        Ok(c) => c,
        Err(_) => {
            let c = Collection::create(dir, "code", 2, DistanceMetric::Cosine).unwrap();
            c.write_point(&Point::new("p1", vec![1.0, 0.0])).unwrap();
            let dim = VectorDimension::new(2).unwrap();
            let BuildOutcome::Complete { .. } =
                AnnIndex::rebuild(c.path(), dim, DistanceMetric::Cosine, None).unwrap()
            else {
                panic!("expected complete build");
            };
            c
        }
    };
    let index = AnnIndex::load(collection.path()).unwrap();
    CacheEntry::new(collection, index)
}

#[test]
fn ref_count_stays_bounded_under_concurrent_stress() {
    const THREADS: usize = 10;
    const ITERATIONS: usize = 10;

    let tracker = QueryTracker::new();
    let path = Path::new("/stress/project");
    let violation = Arc::new(AtomicBool::new(false));

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let tracker = Arc::clone(&tracker);
            let violation = Arc::clone(&violation);
            scope.spawn(move || {
                for _ in 0..ITERATIONS {
                    let _guard = tracker.track_query(path);
                    let count = tracker.get_ref_count(path);
                    if count == 0 || count > THREADS as u64 {
                        violation.store(true, Ordering::SeqCst);
                    }
                    std::thread::yield_now();
                }
            });
        }
    });

    assert!(!violation.load(Ordering::SeqCst), "count left [1, N] mid-scope");
    assert_eq!(tracker.get_ref_count(path), 0);
}

#[test]
fn ref_count_released_even_when_queries_panic() {
    let tracker = QueryTracker::new();
    let path = Path::new("/panicky/project");

    for _ in 0..5 {
        let tracker = Arc::clone(&tracker);
        let handle = std::thread::spawn(move || {
            let _guard = tracker.track_query(Path::new("/panicky/project"));
            panic!("simulated query failure");
        });
        assert!(handle.join().is_err());
    }

    assert_eq!(tracker.get_ref_count(path), 0);
}

#[test]
fn eviction_never_removes_a_referenced_entry() {
    let dir = TempDir::new().unwrap();
    let tracker = QueryTracker::new();
    // ttl 0: the entry is always idle, so only the ref count protects it
    let config = CacheConfig {
        ttl_secs: 0,
        eviction_interval_secs: 3600,
        invalidate_on_upsert: false,
    };
    let cache = WarmCache::new(&config, Arc::clone(&tracker));
    let project = Path::new("/proj");

    cache
        .get_or_load(project, || Ok(load_entry(dir.path())))
        .unwrap();

    let guard = tracker.track_query(project);

    std::thread::scope(|scope| {
        // The evictor hammers away while the reference is held
        let evictor_cache = &cache;
        scope.spawn(move || {
            for _ in 0..200 {
                assert_eq!(evictor_cache.evict_idle(), 0);
                std::thread::yield_now();
            }
        });

        for _ in 0..200 {
            assert!(cache.contains(project), "entry vanished while referenced");
            std::thread::yield_now();
        }
    });

    // Once nothing references the entry, eviction may proceed
    drop(guard);
    assert_eq!(cache.evict_idle(), 1);
    assert!(!cache.contains(project));
}

#[test]
fn referenced_entry_survives_explicit_eviction_pass() {
    let dir = TempDir::new().unwrap();
    let tracker = QueryTracker::new();
    let config = CacheConfig {
        ttl_secs: 0,
        eviction_interval_secs: 3600,
        invalidate_on_upsert: false,
    };
    let cache = WarmCache::new(&config, Arc::clone(&tracker));
    let project = Path::new("/proj");

    cache
        .get_or_load(project, || Ok(load_entry(dir.path())))
        .unwrap();

    let guard = tracker.track_query(project);
    for _ in 0..10 {
        assert_eq!(cache.evict_idle(), 0);
        assert!(cache.contains(project));
    }

    drop(guard);
    assert_eq!(cache.evict_idle(), 1);
}

#[test]
fn readers_keep_old_entry_across_invalidation() {
    let dir = TempDir::new().unwrap();
    let tracker = QueryTracker::new();
    let config = CacheConfig {
        ttl_secs: 3600,
        eviction_interval_secs: 3600,
        invalidate_on_upsert: false,
    };
    let cache = WarmCache::new(&config, tracker);
    let project = Path::new("/proj");

    let held = cache
        .get_or_load(project, || Ok(load_entry(dir.path())))
        .unwrap();

    cache.invalidate(project);

    // The map slot is gone but the held handle still works
    assert!(!cache.contains(project));
    assert_eq!(held.index().len(), 1);
    assert!(held.index().query(&[1.0, 0.0], 1).unwrap()[0].0 == "p1");

    // Next access loads a fresh entry
    let fresh = cache
        .get_or_load(project, || Ok(load_entry(dir.path())))
        .unwrap();
    assert!(!Arc::ptr_eq(&held, &fresh));
}

#[test]
fn concurrent_misses_load_the_entry_once() {
    let dir = TempDir::new().unwrap();
    let tracker = QueryTracker::new();
    let config = CacheConfig {
        ttl_secs: 3600,
        eviction_interval_secs: 3600,
        invalidate_on_upsert: false,
    };
    let cache = WarmCache::new(&config, tracker);
    let project = Path::new("/proj");

    // Seed the collection on disk first so loads are read-only
    drop(load_entry(dir.path()));

    let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    std::thread::scope(|scope| {
        for _ in 0..8 {
            let cache = &cache;
            let loads = Arc::clone(&loads);
            let base = dir.path();
            scope.spawn(move || {
                cache
                    .get_or_load(project, || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        Ok(load_entry(base))
                    })
                    .unwrap();
            });
        }
    });

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}
