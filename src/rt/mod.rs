//! Realtime inverted index.
//!
//! Per-cell growing arrays of `(vid, code)` entries that absorb new
//! vectors, take in-place updates, and compact away tombstoned entries
//! while searches keep scanning. The [`InvertedListView`] adapter presents
//! the live buckets to the scanner in the classical `(codes, ids)` shape.

mod invert;
mod view;

pub use invert::{ListRef, RealtimeInvertIndex};
pub use view::InvertedListView;
