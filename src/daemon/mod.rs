//! Daemon-resident state: query tracking, warm cache, and the service
//! layer that ties the store, index, and embedding pipeline together.

mod cache;
mod service;
mod tracker;

pub use cache::{CacheEntry, WarmCache};
pub use service::{DaemonService, IndexItem, IndexResponse, IndexStatus, QueryResponse};
pub use tracker::{QueryGuard, QueryTracker};
