//! Configuration module for the semantic-search storage engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `QUIVER_` and use double
//! underscores to separate nested levels:
//! - `QUIVER_STORAGE__VECTOR_DIM=1536` sets `storage.vector_dim`
//! - `QUIVER_CACHE__TTL_SECS=600` sets `cache.ttl_secs`
//! - `QUIVER_EMBEDDING__WORKERS=4` sets `embedding.workers`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::index::DistanceMetric;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding per-collection storage under each project
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Vector storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding pipeline configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Warm cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Dimension every vector in a default collection must have
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Distance metric used for similarity scoring
    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Name of the collection created by the index operation
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Prefetch multiplier: search asks the ANN index for
    /// `limit * prefetch_factor` candidates to absorb filter rejection
    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Model identifier sent to the embedding provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Provider endpoint for embedding requests
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the provider API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request token ceiling for batched embedding calls
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: usize,

    /// Number of worker threads in the embedding pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum retry attempts for transient provider failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Idle time after which a warm cache entry becomes evictable
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the eviction worker scans entries
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Whether plain upserts drop the warm entry immediately.
    /// When false, upserted points stay invisible to ANN search until the
    /// next rebuild (degraded but available).
    #[serde(default = "default_false")]
    pub invalidate_on_upsert: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from(".quiver")
}
fn default_false() -> bool {
    false
}
fn default_vector_dim() -> usize {
    1536
}
fn default_collection() -> String {
    "code".to_string()
}
fn default_prefetch_factor() -> usize {
    4
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_api_key_env() -> String {
    "QUIVER_API_KEY".to_string()
}
fn default_max_tokens() -> usize {
    8000
}
fn default_workers() -> usize {
    num_cpus::get().min(8)
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_eviction_interval_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage_dir: default_storage_dir(),
            debug: false,
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_dim: default_vector_dim(),
            distance_metric: DistanceMetric::default(),
            collection: default_collection(),
            prefetch_factor: default_prefetch_factor(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            max_tokens_per_request: default_max_tokens(),
            workers: default_workers(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            invalidate_on_upsert: false,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path =
            Self::find_workspace_config().unwrap_or_else(|| PathBuf::from(".quiver/settings.toml"));

        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with QUIVER_ prefix.
            // Double underscore (__) separates nested levels.
            .merge(Env::prefixed("QUIVER_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .quiver directory,
    /// searching from the current directory up to root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".quiver");
            if config_dir.exists() && config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Storage root for a given project path.
    pub fn project_storage(&self, project: &std::path::Path) -> PathBuf {
        project.join(&self.storage_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.storage.vector_dim, 1536);
        assert_eq!(settings.storage.collection, "code");
        assert!(settings.storage.prefetch_factor >= 1);
        assert_eq!(settings.cache.ttl_secs, 300);
        assert!(!settings.cache.invalidate_on_upsert);
        assert!(settings.embedding.workers >= 1);
    }

    #[test]
    fn test_project_storage_path() {
        let settings = Settings::default();
        let path = settings.project_storage(std::path::Path::new("/tmp/proj"));
        assert_eq!(path, PathBuf::from("/tmp/proj/.quiver"));
    }

    #[test]
    fn test_cache_durations() {
        let cache = CacheConfig {
            ttl_secs: 10,
            eviction_interval_secs: 2,
            invalidate_on_upsert: true,
        };
        assert_eq!(cache.ttl(), Duration::from_secs(10));
        assert_eq!(cache.eviction_interval(), Duration::from_secs(2));
    }
}
