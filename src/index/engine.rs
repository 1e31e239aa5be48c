//! IVFFlat index build and query engine.
//!
//! A rebuild scans every point file in the collection, clusters the vectors
//! with K-means, and persists two artifacts under `<collection>/index/`:
//! `meta.json` (centroids, cluster membership, point-id table) and
//! `vectors.seg` (packed vectors, memory-mapped at query time). The build
//! writes into a temporary directory and swaps it in with a rename, so a
//! failed or cancelled build leaves the previous index intact and readers
//! holding the old mapping are undisturbed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::index::clustering::{self, kmeans_clustering};
use crate::index::storage::VectorSegment;
use crate::index::types::{DistanceMetric, IndexError, IndexResult, VectorDimension, VectorId};
use crate::progress::{BuildStats, Progress, ProgressFn, report};

/// Directory under a collection holding index artifacts.
pub const INDEX_DIR: &str = "index";

/// Metadata file name inside the index directory.
const META_FILE: &str = "meta.json";

/// Segment file name inside the index directory.
const SEGMENT_FILE: &str = "vectors.seg";

/// Current metadata schema version.
const META_VERSION: u32 = 1;

/// Number of clusters probed per query before widening.
const NPROBE: usize = 3;

/// Number of clusters for a rebuild over `n` vectors.
///
/// Uses the square-root heuristic, clamped to `[1, 100]`.
#[must_use]
pub fn rebuild_cluster_count(n: usize) -> usize {
    (n as f64).sqrt().ceil().clamp(1.0, 100.0) as usize
}

/// Persisted index metadata.
#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    version: u32,
    dimension: usize,
    metric: DistanceMetric,
    /// Point ids in `VectorId` order (position i holds vector i).
    point_ids: Vec<String>,
    /// Normalized cluster centroids.
    centroids: Vec<Vec<f32>>,
    /// Per-cluster vector positions into the segment.
    clusters: Vec<Vec<u32>>,
    built_at: DateTime<Utc>,
}

/// Outcome of a rebuild: either a usable index or a cooperative cancellation.
pub enum BuildOutcome {
    /// Build finished; the new index is on disk and loaded.
    Complete { index: AnnIndex, stats: BuildStats },
    /// The progress callback requested a stop. On-disk state is untouched.
    Cancelled,
}

/// Loaded ANN index over one collection.
///
/// Queries probe the nearest centroids and score candidates exactly from the
/// memory-mapped segment. Results are best-first with ties broken by point id
/// ascending, so repeated queries are deterministic.
pub struct AnnIndex {
    meta: IndexMeta,
    segment: VectorSegment,
}

/// Minimal view of a point file: the engine only needs id and vector.
#[derive(Deserialize)]
struct PointVector {
    id: String,
    vector: Vec<f32>,
}

impl AnnIndex {
    /// Loads previously-built artifacts from `<collection_path>/index/`.
    pub fn load(collection_path: &Path) -> IndexResult<Self> {
        let index_dir = collection_path.join(INDEX_DIR);
        let meta_path = index_dir.join(META_FILE);

        let meta_bytes = fs::read(&meta_path).map_err(|_| IndexError::NotBuilt {
            path: index_dir.clone(),
        })?;
        let meta: IndexMeta =
            serde_json::from_slice(&meta_bytes).map_err(|e| IndexError::InvalidFormat {
                path: meta_path.clone(),
                reason: e.to_string(),
            })?;

        if meta.version != META_VERSION {
            return Err(IndexError::VersionMismatch {
                expected: META_VERSION,
                actual: meta.version,
            });
        }

        let segment = VectorSegment::open(&index_dir.join(SEGMENT_FILE))?;

        if segment.len() != meta.point_ids.len() {
            return Err(IndexError::InvalidFormat {
                path: meta_path,
                reason: format!(
                    "segment holds {} vectors but metadata lists {} points",
                    segment.len(),
                    meta.point_ids.len()
                ),
            });
        }

        debug!(
            points = meta.point_ids.len(),
            clusters = meta.centroids.len(),
            "loaded ANN index"
        );

        Ok(Self { meta, segment })
    }

    /// Rebuilds the index from a full scan of the collection's point files.
    ///
    /// Progress is reported per point file; a `Break` return from the
    /// callback cancels the build between files and leaves the previous
    /// index (if any) in place. Unreadable point files are skipped and
    /// recorded in the build stats rather than failing the whole build.
    pub fn rebuild(
        collection_path: &Path,
        dimension: VectorDimension,
        metric: DistanceMetric,
        progress: Option<&ProgressFn>,
    ) -> IndexResult<BuildOutcome> {
        let mut stats = BuildStats::new();

        let point_files = list_point_files(collection_path)?;
        let total = point_files.len();

        let mut points: Vec<(String, Vec<f32>)> = Vec::with_capacity(total);

        for (i, path) in point_files.iter().enumerate() {
            let p = Progress::step(i, total, path, "scanning points");
            if report(progress, &p) == ControlFlow::Break(()) {
                info!("index build cancelled at {i}/{total} points");
                return Ok(BuildOutcome::Cancelled);
            }

            stats.points_scanned += 1;
            match read_point_vector(path, dimension) {
                Ok(pv) => points.push((pv.id, pv.vector)),
                Err(e) => stats.add_error(path.clone(), e.to_string()),
            }
        }

        // Deterministic VectorId assignment: point id ascending
        points.sort_by(|a, b| a.0.cmp(&b.0));

        let status = Progress::status("clustering vectors");
        if report(progress, &status) == ControlFlow::Break(()) {
            return Ok(BuildOutcome::Cancelled);
        }

        let vectors: Vec<Vec<f32>> = points.iter().map(|(_, v)| v.clone()).collect();
        let point_ids: Vec<String> = points.into_iter().map(|(id, _)| id).collect();

        let (centroids, clusters) = if vectors.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let k = rebuild_cluster_count(vectors.len());
            let result = kmeans_clustering(&vectors, k)
                .map_err(|e| IndexError::ClusteringFailed(e.to_string()))?;

            let mut clusters: Vec<Vec<u32>> = vec![Vec::new(); k];
            for (pos, cluster_id) in result.assignments.iter().enumerate() {
                clusters[cluster_id.index()].push(pos as u32);
            }
            (result.centroids, clusters)
        };

        let meta = IndexMeta {
            version: META_VERSION,
            dimension: dimension.get(),
            metric,
            point_ids,
            centroids,
            clusters,
            built_at: Utc::now(),
        };

        stats.points_indexed = meta.point_ids.len();
        stats.clusters = meta.centroids.len();

        write_artifacts(collection_path, &meta, dimension, &vectors)?;

        stats.stop_timing();
        info!(
            points = stats.points_indexed,
            clusters = stats.clusters,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "index rebuild complete"
        );

        if total > 0 {
            let done = Progress::step(total, total, collection_path, "index built");
            // Completion report; a Break here changes nothing, the swap is done
            let _ = report(progress, &done);
        }

        let index = Self::load(collection_path)?;
        Ok(BuildOutcome::Complete { index, stats })
    }

    /// Queries the index for the `k` best matches, best-first.
    ///
    /// Probes the `NPROBE` nearest centroids and widens to more clusters when
    /// they hold fewer than `k` candidates. Ties in score break by point id
    /// ascending.
    pub fn query(&self, query_vector: &[f32], k: usize) -> IndexResult<Vec<(String, f32)>> {
        VectorDimension::new(self.meta.dimension)?.validate_vector(query_vector)?;

        if k == 0 || self.meta.point_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Rank clusters by centroid similarity
        let mut cluster_order: Vec<(usize, f32)> = self
            .meta
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, clustering::cosine_similarity(query_vector, c)))
            .collect();
        cluster_order.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Probe nearest clusters, widening until we have at least k candidates
        let mut candidates: Vec<u32> = Vec::new();
        for (probed, (cluster_idx, _)) in cluster_order.iter().enumerate() {
            if probed >= NPROBE && candidates.len() >= k {
                break;
            }
            candidates.extend(&self.meta.clusters[*cluster_idx]);
        }

        let metric = self.meta.metric;
        let mut scored: Vec<(&str, f32)> = Vec::with_capacity(candidates.len());
        for pos in candidates {
            let id = VectorId::from_position(pos as usize);
            if let Some(vector) = self.segment.read_vector(id) {
                let score = metric.score(query_vector, &vector);
                scored.push((self.meta.point_ids[pos as usize].as_str(), score));
            }
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect())
    }

    /// Number of points in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.meta.point_ids.len()
    }

    /// True when the index holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.point_ids.is_empty()
    }

    /// Timestamp of the build that produced this index.
    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.meta.built_at
    }

    /// Point ids in internal vector order.
    #[must_use]
    pub fn point_ids(&self) -> &[String] {
        &self.meta.point_ids
    }
}

/// Lists the collection's point files in deterministic (filename) order.
fn list_point_files(collection_path: &Path) -> IndexResult<Vec<PathBuf>> {
    let points_dir = collection_path.join("points");
    if !points_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(&points_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Reads a point file's id and vector, validating the dimension.
fn read_point_vector(path: &Path, dimension: VectorDimension) -> IndexResult<PointVector> {
    let bytes = fs::read(path)?;
    let pv: PointVector =
        serde_json::from_slice(&bytes).map_err(|e| IndexError::UnreadablePoint {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    dimension.validate_vector(&pv.vector)?;
    Ok(pv)
}

/// Writes artifacts into a temp directory, then swaps it in atomically.
///
/// The old index directory (if present) is renamed aside before the swap and
/// restored if the swap fails, so a crash mid-write never leaves a
/// half-written index in place of a good one.
fn write_artifacts(
    collection_path: &Path,
    meta: &IndexMeta,
    dimension: VectorDimension,
    vectors: &[Vec<f32>],
) -> IndexResult<()> {
    let tmp = tempfile::Builder::new()
        .prefix(".index-build-")
        .tempdir_in(collection_path)?;

    VectorSegment::write(&tmp.path().join(SEGMENT_FILE), dimension, vectors)?;
    let meta_json = serde_json::to_vec_pretty(meta).map_err(|e| IndexError::InvalidFormat {
        path: tmp.path().join(META_FILE),
        reason: e.to_string(),
    })?;
    fs::write(tmp.path().join(META_FILE), meta_json)?;

    let index_dir = collection_path.join(INDEX_DIR);
    let old_dir = collection_path.join("index.old");

    if old_dir.exists() {
        fs::remove_dir_all(&old_dir)?;
    }

    let had_previous = index_dir.exists();
    if had_previous {
        fs::rename(&index_dir, &old_dir)?;
    }

    // TempDir cleanup is disabled once the directory is renamed into place
    let tmp_path = tmp.keep();
    if let Err(e) = fs::rename(&tmp_path, &index_dir) {
        if had_previous {
            let _ = fs::rename(&old_dir, &index_dir);
        }
        let _ = fs::remove_dir_all(&tmp_path);
        return Err(IndexError::Storage(e));
    }

    if had_previous {
        // Readers mapped into the old segment keep the inode alive
        let _ = fs::remove_dir_all(&old_dir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_point(dir: &Path, id: &str, vector: &[f32]) {
        let points_dir = dir.join("points");
        fs::create_dir_all(&points_dir).unwrap();
        let json = serde_json::json!({
            "id": id,
            "vector": vector,
            "payload": {}
        });
        fs::write(
            points_dir.join(format!("{id}.json")),
            serde_json::to_vec(&json).unwrap(),
        )
        .unwrap();
    }

    fn dim4() -> VectorDimension {
        VectorDimension::new(4).unwrap()
    }

    #[test]
    fn test_rebuild_and_query_unit_vectors() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), "p1", &[1.0, 0.0, 0.0, 0.0]);
        write_point(dir.path(), "p2", &[0.0, 1.0, 0.0, 0.0]);
        write_point(dir.path(), "p3", &[0.0, 0.0, 1.0, 0.0]);

        let outcome =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap();
        let index = match outcome {
            BuildOutcome::Complete { index, stats } => {
                assert_eq!(stats.points_indexed, 3);
                index
            }
            BuildOutcome::Cancelled => panic!("build should not cancel without a callback"),
        };

        let results = index.query(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "p1");
        assert!((results[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_query_ordering_and_tiebreak() {
        let dir = TempDir::new().unwrap();
        // b and a are equidistant from the query; a must come first
        write_point(dir.path(), "b", &[0.0, 1.0, 0.0, 0.0]);
        write_point(dir.path(), "a", &[0.0, 1.0, 0.0, 0.0]);
        write_point(dir.path(), "c", &[1.0, 0.0, 0.0, 0.0]);

        let outcome =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap();
        let BuildOutcome::Complete { index, .. } = outcome else {
            panic!("expected complete build");
        };

        let results = index.query(&[0.0, 1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "b");
        assert_eq!(results[2].0, "c");
    }

    #[test]
    fn test_cancellation_leaves_no_index() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            write_point(dir.path(), &format!("p{i}"), &[i as f32, 1.0, 0.0, 0.0]);
        }

        let calls = AtomicUsize::new(0);
        let outcome = AnnIndex::rebuild(
            dir.path(),
            dim4(),
            DistanceMetric::Cosine,
            Some(&move |_p: &Progress<'_>| {
                if calls.fetch_add(1, Ordering::SeqCst) >= 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }),
        )
        .unwrap();

        assert!(matches!(outcome, BuildOutcome::Cancelled));
        assert!(!dir.path().join(INDEX_DIR).exists());
        assert!(matches!(
            AnnIndex::load(dir.path()),
            Err(IndexError::NotBuilt { .. })
        ));
    }

    #[test]
    fn test_rebuild_replaces_previous_index() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), "p1", &[1.0, 0.0, 0.0, 0.0]);

        let BuildOutcome::Complete { index, .. } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };
        assert_eq!(index.len(), 1);

        write_point(dir.path(), "p2", &[0.0, 1.0, 0.0, 0.0]);
        let BuildOutcome::Complete { index, .. } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };
        assert_eq!(index.len(), 2);
        assert!(!dir.path().join("index.old").exists());
    }

    #[test]
    fn test_rebuild_with_duplicate_vectors() {
        let dir = TempDir::new().unwrap();
        // Same chunk embedded four times; cluster count is 2 here, so
        // centroid initialization must cope with coincident points
        for i in 0..4 {
            write_point(dir.path(), &format!("p{i}"), &[1.0, 0.0, 0.0, 0.0]);
        }

        let BuildOutcome::Complete { index, stats } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };

        assert_eq!(stats.points_indexed, 4);
        let results = index.query(&[1.0, 0.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].0, "p0");
    }

    #[test]
    fn test_unreadable_point_skipped() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), "good", &[1.0, 0.0, 0.0, 0.0]);
        let points_dir = dir.path().join("points");
        fs::write(points_dir.join("broken.json"), b"not json").unwrap();

        let BuildOutcome::Complete { index, stats } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };

        assert_eq!(index.len(), 1);
        assert_eq!(stats.points_scanned, 2);
        assert_eq!(stats.errors.len(), 1);
    }

    #[test]
    fn test_empty_collection_builds_empty_index() {
        let dir = TempDir::new().unwrap();

        let BuildOutcome::Complete { index, .. } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };

        assert!(index.is_empty());
        assert!(index.query(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), "p1", &[1.0, 0.0, 0.0, 0.0]);

        let BuildOutcome::Complete { index, .. } =
            AnnIndex::rebuild(dir.path(), dim4(), DistanceMetric::Cosine, None).unwrap()
        else {
            panic!("expected complete build");
        };

        assert!(matches!(
            index.query(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cluster_count_heuristic() {
        assert_eq!(rebuild_cluster_count(0), 1);
        assert_eq!(rebuild_cluster_count(1), 1);
        assert_eq!(rebuild_cluster_count(100), 10);
        assert_eq!(rebuild_cluster_count(101), 11);
        assert_eq!(rebuild_cluster_count(1_000_000), 100);
    }
}
