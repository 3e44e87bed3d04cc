//! Append-only raw vector store.
//!
//! Owns the original float vectors in a flat row slab, the `vid ↔ docid`
//! maps, and optional per-vector source blobs. Vids are assigned
//! monotonically at append time and rows are never moved, so a vid handed
//! to a caller always resolves for the lifetime of the store. In-place
//! overwrites keep the vid and enqueue it on the updated-vid stream for
//! the engine to re-index on its next ingestion tick.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use smallvec::SmallVec;
use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Borrowed view of a contiguous row range. Holds a read lock; release it
/// before mutating the store.
pub type VectorsRef<'a> = MappedRwLockReadGuard<'a, [f32]>;

/// Consistent point-in-time view of rows and the vid → docid map.
///
/// Holds one read lock for its whole lifetime; use this instead of
/// interleaving [`RawVectorStore::get_vector_header`] with per-vid lookups
/// when both are needed in one scan.
pub struct StoreSnapshot<'a> {
    guard: RwLockReadGuard<'a, StoreInner>,
    dimension: usize,
}

impl StoreSnapshot<'_> {
    /// Number of rows in the snapshot.
    #[must_use]
    pub fn vector_num(&self) -> usize {
        self.guard.vid2docid.len()
    }

    /// Row of one vid.
    #[must_use]
    pub fn row(&self, vid: usize) -> &[f32] {
        &self.guard.data[vid * self.dimension..(vid + 1) * self.dimension]
    }

    /// Docid owning `vid`, `-1` when unknown.
    #[must_use]
    pub fn docid_of(&self, vid: usize) -> i64 {
        self.guard.vid2docid.get(vid).copied().unwrap_or(-1)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Row slab, `vector_num x dimension`.
    data: Vec<f32>,
    vid2docid: Vec<i64>,
    docid2vid: HashMap<i64, SmallVec<[i64; 4]>>,
    sources: Vec<Option<Vec<u8>>>,
}

/// Shared append-only store of raw vectors.
#[derive(Debug)]
pub struct RawVectorStore {
    dimension: usize,
    max_vector_size: usize,
    max_vectors_per_doc: usize,
    inner: RwLock<StoreInner>,
    updated_tx: Sender<i64>,
    updated_rx: Receiver<i64>,
}

impl RawVectorStore {
    /// Create a store for vectors of `dimension` components.
    ///
    /// `max_vector_size` is the expected total footprint used by the
    /// inverted index for pre-allocation; `max_vectors_per_doc` bounds the
    /// docid → vid fan-out.
    #[must_use]
    pub fn new(dimension: usize, max_vector_size: usize, max_vectors_per_doc: usize) -> Self {
        let (updated_tx, updated_rx) = crossbeam_channel::unbounded();
        Self {
            dimension,
            max_vector_size,
            max_vectors_per_doc,
            inner: RwLock::new(StoreInner::default()),
            updated_tx,
            updated_rx,
        }
    }

    /// Vector dimension (`raw_d`).
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Expected total vector footprint.
    #[must_use]
    pub fn max_vector_size(&self) -> usize {
        self.max_vector_size
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn vector_num(&self) -> usize {
        self.inner.read().vid2docid.len()
    }

    /// Append a vector for `docid`, returning its vid.
    pub fn add(&self, docid: i64, vector: &[f32], source: Option<Vec<u8>>) -> Result<i64> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        let mut inner = self.inner.write();
        let vids = inner.docid2vid.entry(docid).or_default();
        if vids.len() >= self.max_vectors_per_doc {
            return Err(EngineError::InvalidParameter(format!(
                "docid {docid} exceeds {} vectors",
                self.max_vectors_per_doc
            )));
        }
        let vid = inner.vid2docid.len() as i64;
        inner.docid2vid.entry(docid).or_default().push(vid);
        inner.vid2docid.push(docid);
        inner.data.extend_from_slice(vector);
        inner.sources.push(source);
        Ok(vid)
    }

    /// Overwrite the vector of an existing vid and enqueue it on the
    /// updated-vid stream.
    pub fn update_vector(&self, vid: i64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        {
            let mut inner = self.inner.write();
            let n = inner.vid2docid.len();
            if vid < 0 || vid as usize >= n {
                return Err(EngineError::UpdateFailure(format!("unknown vid {vid}")));
            }
            let start = vid as usize * self.dimension;
            inner.data[start..start + self.dimension].copy_from_slice(vector);
        }
        // Queue is unbounded, a send only fails when the store is gone.
        let _ = self.updated_tx.send(vid);
        Ok(())
    }

    /// Point-in-time view of every row plus the vid → docid map.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            guard: self.inner.read(),
            dimension: self.dimension,
        }
    }

    /// Borrow rows `[start, end)` of the slab.
    #[must_use]
    pub fn get_vector_header(&self, start: usize, end: usize) -> VectorsRef<'_> {
        RwLockReadGuard::map(self.inner.read(), |inner| {
            &inner.data[start * self.dimension..end * self.dimension]
        })
    }

    /// Scatter read. Slots for out-of-range or negative vids are `None`.
    #[must_use]
    pub fn gets(&self, vids: &[i64]) -> Vec<Option<Vec<f32>>> {
        let inner = self.inner.read();
        let n = inner.vid2docid.len();
        vids.iter()
            .map(|&vid| {
                if vid < 0 || vid as usize >= n {
                    return None;
                }
                let start = vid as usize * self.dimension;
                Some(inner.data[start..start + self.dimension].to_vec())
            })
            .collect()
    }

    /// Source blob attached to `vid`, if any.
    #[must_use]
    pub fn get_source(&self, vid: i64) -> Option<Vec<u8>> {
        if vid < 0 {
            return None;
        }
        let inner = self.inner.read();
        inner.sources.get(vid as usize).cloned().flatten()
    }

    /// Docid owning `vid`, `-1` when unknown.
    #[must_use]
    pub fn vid2docid(&self, vid: i64) -> i64 {
        if vid < 0 {
            return -1;
        }
        let inner = self.inner.read();
        inner.vid2docid.get(vid as usize).copied().unwrap_or(-1)
    }

    /// All vids of `docid`, at most `max_vectors_per_doc`.
    #[must_use]
    pub fn docid2vid(&self, docid: i64) -> SmallVec<[i64; 4]> {
        let inner = self.inner.read();
        inner.docid2vid.get(&docid).cloned().unwrap_or_default()
    }

    /// Consumer side of the updated-vid stream.
    #[must_use]
    pub fn try_dequeue_updated(&self) -> Option<i64> {
        self.updated_rx.try_recv().ok()
    }
}
