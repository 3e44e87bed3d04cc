//! Shared vector and tombstone state.
//!
//! The raw vector store and the docid bitmap are shared collaborators: the
//! engine holds `Arc` handles and never owns their lifetime exclusively.

mod bitmap;
mod raw;

pub use bitmap::DocidBitmap;
pub use raw::{RawVectorStore, StoreSnapshot, VectorsRef};
