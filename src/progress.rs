//! Progress reporting for long-running index operations.
//!
//! Callers receive `(current, total, item_path, info)` reports. A report with
//! `total == 0` carries a free-text status message rather than numeric
//! progress; `current == total` (with `total > 0`) signals completion. The
//! callback returns [`ControlFlow`]: `Break(())` requests cooperative
//! cancellation, checked between units of work.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A single progress report.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Units completed so far
    pub current: usize,

    /// Total units, or 0 for a free-text status message
    pub total: usize,

    /// Item currently being processed, when meaningful
    pub item_path: Option<&'a Path>,

    /// Human-readable status text
    pub info: &'a str,
}

impl<'a> Progress<'a> {
    /// Numeric progress step.
    pub fn step(current: usize, total: usize, item_path: &'a Path, info: &'a str) -> Self {
        Self {
            current,
            total,
            item_path: Some(item_path),
            info,
        }
    }

    /// Free-text status message (total == 0 by contract).
    pub fn status(info: &'a str) -> Self {
        Self {
            current: 0,
            total: 0,
            item_path: None,
            info,
        }
    }

    /// True when this report signals completion.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current == self.total
    }
}

/// Callback signature for progress reporting with cooperative cancellation.
pub type ProgressFn = dyn Fn(&Progress<'_>) -> ControlFlow<()> + Send + Sync;

/// Invoke an optional progress callback, defaulting to "continue".
pub(crate) fn report(progress: Option<&ProgressFn>, p: &Progress<'_>) -> ControlFlow<()> {
    match progress {
        Some(f) => f(p),
        None => ControlFlow::Continue(()),
    }
}

/// Statistics collected during an index build.
#[derive(Debug, Default)]
pub struct BuildStats {
    /// Number of point files scanned
    pub points_scanned: usize,

    /// Number of vectors that made it into the index
    pub points_indexed: usize,

    /// Number of clusters in the built index
    pub clusters: usize,

    /// Time elapsed during the build
    pub elapsed: Duration,

    /// Errors encountered (limited to first N errors)
    pub errors: Vec<(PathBuf, String)>,

    /// Start time of the build
    start_time: Option<Instant>,
}

impl BuildStats {
    /// Create new stats and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed = start.elapsed();
            self.start_time = None;
        }
    }

    /// Add an error (limited to first 100 errors)
    pub fn add_error(&mut self, path: PathBuf, error: String) {
        if self.errors.len() < 100 {
            self.errors.push((path, error));
        }
    }

    /// Display the statistics in a human-readable format
    pub fn display(&self) {
        println!("\nIndex Build Complete:");
        println!("  Points scanned: {}", self.points_scanned);
        println!("  Points indexed: {}", self.points_indexed);
        println!("  Clusters: {}", self.clusters);
        println!("  Time elapsed: {:.2}s", self.elapsed.as_secs_f64());

        if self.points_indexed > 0 && self.elapsed.as_secs_f64() > 0.0 {
            let per_sec = self.points_indexed as f64 / self.elapsed.as_secs_f64();
            println!("  Performance: {per_sec:.0} points/second");
        }

        if !self.errors.is_empty() {
            println!("\nErrors (showing first {}):", self.errors.len().min(5));
            for (path, error) in &self.errors[..5.min(self.errors.len())] {
                println!("  {}: {}", path.display(), error);
            }
            if self.errors.len() > 5 {
                println!("  ... and {} more errors", self.errors.len() - 5);
            }
        }
    }
}
