//! Growing per-cell storage of `(vid, code)` entries.
//!
//! Each bucket is a pair of parallel arrays guarded by its own lock, so
//! searches read cells concurrently while the single ingestion writer
//! appends, updates, and compacts. A relocated or superseded entry is
//! invalidated in place by writing `-1` over its vid slot; scanners skip
//! negative vids and compaction drops the slots for good. Compaction
//! builds replacement arrays first and swaps them in under the bucket
//! lock, so readers never observe a half-rewritten cell.

use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::store::{DocidBitmap, RawVectorStore};

#[derive(Debug, Default)]
struct Bucket {
    vids: Vec<i64>,
    codes: Vec<u8>,
}

/// Borrowed view of one bucket's live arrays.
///
/// Holds the bucket's read lock; contents are stable only for the guard's
/// lifetime. Do not hold across `add_keys` or `compact_bucket` on the
/// same bucket.
pub struct ListRef<'a> {
    guard: RwLockReadGuard<'a, Bucket>,
}

impl ListRef<'_> {
    /// Number of physical entries (including invalidated slots).
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard.vids.len()
    }

    /// True when the bucket has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard.vids.is_empty()
    }

    /// Vid per entry; `-1` marks an invalidated slot.
    #[must_use]
    pub fn ids(&self) -> &[i64] {
        &self.guard.vids
    }

    /// Flat code bytes, `len() * code_size`.
    #[must_use]
    pub fn codes(&self) -> &[u8] {
        &self.guard.codes
    }
}

/// Realtime inverted index over `nlist` buckets.
pub struct RealtimeInvertIndex {
    nlist: usize,
    code_size: usize,
    bucket_keys: usize,
    bucket_keys_limit: usize,
    buckets: Vec<RwLock<Bucket>>,
    /// vid → (bucket, slot) of its live entry.
    positions: RwLock<HashMap<i64, (usize, usize)>>,
    bitmap: Arc<DocidBitmap>,
    store: Arc<RawVectorStore>,
}

impl RealtimeInvertIndex {
    /// Create the index.
    ///
    /// `bucket_keys` is the per-bucket pre-allocation applied by [`init`],
    /// `bucket_keys_limit` the hard per-bucket entry cap. The bitmap and
    /// the store's `vid → docid` map are the only collaborator state read
    /// here; this index never calls back into the engine.
    ///
    /// [`init`]: RealtimeInvertIndex::init
    #[must_use]
    pub fn new(
        nlist: usize,
        code_size: usize,
        bucket_keys: usize,
        bucket_keys_limit: usize,
        bitmap: Arc<DocidBitmap>,
        store: Arc<RawVectorStore>,
    ) -> Self {
        Self {
            nlist,
            code_size,
            bucket_keys,
            bucket_keys_limit,
            buckets: (0..nlist).map(|_| RwLock::new(Bucket::default())).collect(),
            positions: RwLock::new(HashMap::new()),
            bitmap,
            store,
        }
    }

    /// Pre-allocate each bucket for the expected footprint. Buckets may
    /// still grow past this up to `bucket_keys_limit`.
    pub fn init(&self) {
        for bucket in &self.buckets {
            let mut bucket = bucket.write();
            bucket.vids.reserve(self.bucket_keys);
            bucket.codes.reserve(self.bucket_keys * self.code_size);
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Bytes per stored code.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Total physical entries across buckets (invalidated slots included).
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.buckets.iter().map(|b| b.read().vids.len()).sum()
    }

    /// Append batched `(vid, code)` groups, all-or-nothing.
    ///
    /// Groups are keyed by bucket; each group carries parallel vids and
    /// flat code bytes. Capacity is validated across every target bucket
    /// before anything is written.
    pub fn add_keys(&self, groups: HashMap<usize, (Vec<i64>, Vec<u8>)>) -> Result<()> {
        for (&list_no, (vids, codes)) in &groups {
            if list_no >= self.nlist {
                return Err(EngineError::InvalidParameter(format!(
                    "list_no {list_no} out of range"
                )));
            }
            if codes.len() != vids.len() * self.code_size {
                return Err(EngineError::CodecFailure(format!(
                    "bucket {list_no}: {} codes bytes for {} vids",
                    codes.len(),
                    vids.len()
                )));
            }
            let current = self.buckets[list_no].read().vids.len();
            if current + vids.len() > self.bucket_keys_limit {
                return Err(EngineError::CapacityExhausted {
                    list_no,
                    requested: current + vids.len(),
                    limit: self.bucket_keys_limit,
                });
            }
        }

        let mut positions = self.positions.write();
        for (list_no, (vids, codes)) in groups {
            let mut bucket = self.buckets[list_no].write();
            for (i, &vid) in vids.iter().enumerate() {
                positions.insert(vid, (list_no, bucket.vids.len() + i));
            }
            bucket.vids.extend_from_slice(&vids);
            bucket.codes.extend_from_slice(&codes);
        }
        Ok(())
    }

    /// Replace the code associated with `vid`.
    ///
    /// When the vid already lives in `list_no` the code is overwritten in
    /// place, so repeating the call with identical arguments is a no-op.
    /// When it lives elsewhere the old slot is invalidated and a fresh
    /// entry is appended to `list_no`. A negative `list_no` only
    /// invalidates.
    pub fn update(&self, list_no: i64, vid: i64, code: &[u8]) -> Result<()> {
        if list_no >= 0 && code.len() != self.code_size {
            return Err(EngineError::CodecFailure(format!(
                "update code is {} bytes, expected {}",
                code.len(),
                self.code_size
            )));
        }

        let mut positions = self.positions.write();
        let previous = positions.get(&vid).copied();

        if let Some((old_list, slot)) = previous {
            if list_no == old_list as i64 {
                let mut bucket = self.buckets[old_list].write();
                bucket.codes[slot * self.code_size..(slot + 1) * self.code_size]
                    .copy_from_slice(code);
                return Ok(());
            }
            let mut bucket = self.buckets[old_list].write();
            bucket.vids[slot] = -1;
            positions.remove(&vid);
        }

        if list_no < 0 {
            tracing::warn!(vid, "updated vector has no representable cell");
            return Ok(());
        }

        let list_no = list_no as usize;
        if list_no >= self.nlist {
            return Err(EngineError::InvalidParameter(format!(
                "list_no {list_no} out of range"
            )));
        }
        let mut bucket = self.buckets[list_no].write();
        if bucket.vids.len() + 1 > self.bucket_keys_limit {
            return Err(EngineError::CapacityExhausted {
                list_no,
                requested: bucket.vids.len() + 1,
                limit: self.bucket_keys_limit,
            });
        }
        positions.insert(vid, (list_no, bucket.vids.len()));
        bucket.vids.push(vid);
        bucket.codes.extend_from_slice(code);
        Ok(())
    }

    /// Rewrite bucket `list_no`, dropping invalidated slots and entries
    /// whose docid is tombstoned. Returns the number of removed entries.
    ///
    /// The replacement arrays are built outside the write lock and swapped
    /// in whole; a failure before the swap leaves the bucket untouched.
    pub fn compact_bucket(&self, list_no: usize) -> Result<usize> {
        if list_no >= self.nlist {
            return Err(EngineError::InvalidParameter(format!(
                "list_no {list_no} out of range"
            )));
        }

        let (fresh, dropped_vids) = {
            let bucket = self.buckets[list_no].read();
            let mut fresh = Bucket {
                vids: Vec::with_capacity(bucket.vids.len()),
                codes: Vec::with_capacity(bucket.codes.len()),
            };
            let mut dropped_vids = Vec::new();
            for (i, &vid) in bucket.vids.iter().enumerate() {
                let live = vid >= 0 && !self.bitmap.test(self.store.vid2docid(vid));
                if live {
                    fresh.vids.push(vid);
                    fresh
                        .codes
                        .extend_from_slice(&bucket.codes[i * self.code_size..(i + 1) * self.code_size]);
                } else if vid >= 0 {
                    dropped_vids.push(vid);
                }
            }
            (fresh, dropped_vids)
        };

        let mut positions = self.positions.write();
        let mut bucket = self.buckets[list_no].write();
        let removed = bucket.vids.len() - fresh.vids.len();
        for vid in dropped_vids {
            positions.remove(&vid);
        }
        for (slot, &vid) in fresh.vids.iter().enumerate() {
            positions.insert(vid, (list_no, slot));
        }
        *bucket = fresh;
        Ok(removed)
    }

    /// Whether accumulated deletions justify a compaction sweep.
    ///
    /// True when tombstoned docs exceed a tenth of the physical entries.
    /// Monotone in `delete_num`.
    #[must_use]
    pub fn compactable(&self, delete_num: usize) -> bool {
        let total = self.total_entries();
        total > 0 && delete_num * 10 > total
    }

    /// Per-bucket codes and vids restricted to `vids`, for small candidate
    /// sets. Unknown vids are skipped.
    #[must_use]
    pub fn retrieve_codes(&self, vids: &[i64]) -> (Vec<Vec<u8>>, Vec<Vec<i64>>) {
        let mut bucket_codes = vec![Vec::new(); self.nlist];
        let mut bucket_vids = vec![Vec::new(); self.nlist];

        let positions = self.positions.read();
        for &vid in vids {
            let Some(&(list_no, slot)) = positions.get(&vid) else {
                continue;
            };
            let bucket = self.buckets[list_no].read();
            if bucket.vids.get(slot).copied() != Some(vid) {
                continue;
            }
            bucket_codes[list_no]
                .extend_from_slice(&bucket.codes[slot * self.code_size..(slot + 1) * self.code_size]);
            bucket_vids[list_no].push(vid);
        }

        (bucket_codes, bucket_vids)
    }

    /// Borrow bucket `list_no`'s live arrays. Out-of-range lists read as
    /// missing; reads never fail.
    #[must_use]
    pub fn get_ivt_list(&self, list_no: usize) -> Option<ListRef<'_>> {
        self.buckets.get(list_no).map(|bucket| ListRef {
            guard: bucket.read(),
        })
    }
}
