//! quiver: realtime IVF-PQ vector search.
//!
//! An approximate nearest-neighbor engine over high-dimensional float
//! vectors that keeps ingesting, updating, and compacting while queries
//! run. Combines two classical ideas:
//!
//! 1. **IVF (Inverted File)**: partition space into `nlist` Voronoi cells
//!    via a coarse quantizer; a query only scans the `nprobe` nearest
//!    cells.
//! 2. **PQ (Product Quantization)**: compress each vector's residual
//!    against its cell centroid into an `m`-byte code; distances to a
//!    compressed code are `m` table lookups.
//!
//! On top of the classical scheme the index is *realtime*: cells are
//! growing arrays that take appends and in-place updates between queries,
//! tombstoned entries are swept out by cooperative compaction, and every
//! search ends with an exact re-ranking pass over the raw vectors plus
//! bitmap and range filtering.
//!
//! ```text
//! ingest:  raw store ──assign──▶ residual ──encode──▶ realtime buckets
//! query:   coarse top-nprobe ──scan──▶ recall pool ──rerank──▶ top-k
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use quiver::{DocidBitmap, IvfPqEngine, IvfPqParams, RawVectorStore, SearchCondition};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RawVectorStore::new(128, 1 << 20, 10));
//! let bitmap = Arc::new(DocidBitmap::new());
//! // ... append at least 8192 vectors through `store.add` ...
//!
//! let params = IvfPqParams { dimension: 128, nlist: 1024, m: 16, ..Default::default() };
//! let mut engine = IvfPqEngine::new(store, bitmap, params)?;
//! engine.indexing()?;
//! engine.add_rt_vecs_to_index()?;
//!
//! let result = engine.search(&query, &SearchCondition::default())?;
//! ```

pub mod coarse;
pub mod distance;
pub mod engine;
pub mod error;
pub mod heap;
pub mod kmeans;
pub mod pq;
pub mod rt;
pub mod simd;
pub mod store;
pub mod table;

// Re-exports
pub use distance::Metric;
pub use engine::condition::{RangeQueryResult, SearchCondition, SearchResult, SearchStats};
pub use engine::{IvfPqEngine, IvfPqParams};
pub use error::{EngineError, Result};
pub use store::{DocidBitmap, RawVectorStore};
