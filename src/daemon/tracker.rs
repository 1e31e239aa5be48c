//! Reference counting for in-flight queries, keyed by project path.
//!
//! The tracker makes cache eviction race-free: every query or index
//! operation holds a guard for its duration, and the eviction worker
//! refuses to drop an entry whose count is nonzero. Counts are a gate, not
//! a lock; the eviction path re-checks under its own exclusion.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-project in-flight operation counts.
#[derive(Debug, Default)]
pub struct QueryTracker {
    counts: DashMap<PathBuf, u64>,
}

impl QueryTracker {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increments the count for a project path.
    pub fn increment_ref(&self, path: &Path) {
        *self.counts.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    /// Decrements the count for a project path.
    ///
    /// # Panics
    /// Panics if the count would go negative. A mismatched decrement is a
    /// programming error, not a recoverable runtime state.
    pub fn decrement_ref(&self, path: &Path) {
        // The entry holds the shard lock, so decrement-and-remove is atomic
        match self.counts.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                assert!(*count > 0, "ref count underflow for {}", path.display());
                *count -= 1;
                if *count == 0 {
                    entry.remove();
                }
            }
            Entry::Vacant(_) => {
                panic!("ref count underflow for {}", path.display());
            }
        }
    }

    /// Point-in-time count for a project path.
    ///
    /// Used by the eviction worker as a gate; it is not a lock, and the
    /// worker re-checks under its own exclusion before evicting.
    #[must_use]
    pub fn get_ref_count(&self, path: &Path) -> u64 {
        self.counts.get(path).map_or(0, |c| *c)
    }

    /// Scoped acquisition: increments now, decrements when the returned
    /// guard drops, on every exit path including panics.
    #[must_use]
    pub fn track_query(self: &Arc<Self>, path: &Path) -> QueryGuard {
        self.increment_ref(path);
        QueryGuard {
            tracker: Arc::clone(self),
            path: path.to_path_buf(),
        }
    }
}

/// RAII guard holding one reference for the duration of an operation.
#[must_use = "dropping the guard immediately releases the reference"]
pub struct QueryGuard {
    tracker: Arc<QueryTracker>,
    path: PathBuf,
}

impl QueryGuard {
    /// Path this guard references.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.tracker.decrement_ref(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_decrement() {
        let tracker = QueryTracker::new();
        let path = Path::new("/proj");

        assert_eq!(tracker.get_ref_count(path), 0);
        tracker.increment_ref(path);
        tracker.increment_ref(path);
        assert_eq!(tracker.get_ref_count(path), 2);

        tracker.decrement_ref(path);
        assert_eq!(tracker.get_ref_count(path), 1);
        tracker.decrement_ref(path);
        assert_eq!(tracker.get_ref_count(path), 0);
    }

    #[test]
    #[should_panic(expected = "ref count underflow")]
    fn test_decrement_below_zero_panics() {
        let tracker = QueryTracker::new();
        tracker.decrement_ref(Path::new("/proj"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let tracker = QueryTracker::new();
        let path = Path::new("/proj");

        {
            let _guard = tracker.track_query(path);
            assert_eq!(tracker.get_ref_count(path), 1);
        }
        assert_eq!(tracker.get_ref_count(path), 0);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let tracker = QueryTracker::new();
        let path = Path::new("/proj").to_path_buf();

        let tracker_clone = Arc::clone(&tracker);
        let path_clone = path.clone();
        let handle = std::thread::spawn(move || {
            let _guard = tracker_clone.track_query(&path_clone);
            panic!("query blew up");
        });

        assert!(handle.join().is_err());
        assert_eq!(tracker.get_ref_count(&path), 0);
    }

    #[test]
    fn test_independent_paths() {
        let tracker = QueryTracker::new();
        let _a = tracker.track_query(Path::new("/a"));
        let _b = tracker.track_query(Path::new("/b"));

        assert_eq!(tracker.get_ref_count(Path::new("/a")), 1);
        assert_eq!(tracker.get_ref_count(Path::new("/b")), 1);
        assert_eq!(tracker.get_ref_count(Path::new("/c")), 0);
    }
}
