//! Vector store: durable, filterable, lazily-loadable point storage.
//!
//! Collections are directories of per-point JSON files plus a descriptor;
//! the ANN index lives alongside as a derived artifact. Points are loaded
//! one file at a time so searches never materialize a whole collection.

mod collection;
mod filter;
mod payload;
mod point;
#[allow(clippy::module_inception)]
mod store;

pub use collection::{Collection, CollectionMeta};
pub use filter::{Condition, Filter, MatchSpec, RangeSpec};
pub use payload::Payload;
pub use point::Point;
pub use store::{SearchHit, SearchParams, UpsertReport, VectorStore};
