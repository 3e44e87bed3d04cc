//! Per-bucket code scanner.
//!
//! One scanner serves one query at a time: `set_query` fixes the query,
//! `set_list` the probed cell, and `scan_codes` walks a `(vids, codes)`
//! pair pushing surviving candidates into the caller's heap. Distances
//! come from the quantizer's lookup table; for inner product the centroid
//! term `⟨q, c⟩` arrives as the coarse distance and is added per hit,
//! for L2 the table is rebuilt per cell over the query residual.

use crate::coarse::CoarseQuantizer;
use crate::engine::condition::RangeQueryResult;
use crate::heap::{Comparator, TopHeap};
use crate::pq::ProductQuantizer;
use crate::store::{DocidBitmap, RawVectorStore};
use crate::Metric;

/// Scanner over one query against live or retrieved bucket arrays.
pub struct IvfPqScanner<'a, C: Comparator> {
    pq: &'a ProductQuantizer,
    coarse: &'a CoarseQuantizer,
    metric: Metric,
    by_residual: bool,
    store: &'a RawVectorStore,
    bitmap: &'a DocidBitmap,
    range: Option<&'a RangeQueryResult>,
    query: Vec<f32>,
    lut: Vec<f32>,
    dis0: f32,
    _cmp: std::marker::PhantomData<C>,
}

impl<'a, C: Comparator> IvfPqScanner<'a, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pq: &'a ProductQuantizer,
        coarse: &'a CoarseQuantizer,
        metric: Metric,
        by_residual: bool,
        store: &'a RawVectorStore,
        bitmap: &'a DocidBitmap,
        range: Option<&'a RangeQueryResult>,
    ) -> Self {
        Self {
            pq,
            coarse,
            metric,
            by_residual,
            store,
            bitmap,
            range,
            query: Vec::new(),
            lut: Vec::new(),
            dis0: 0.0,
            _cmp: std::marker::PhantomData,
        }
    }

    /// Fix the query (already lifted to the index dimension).
    pub fn set_query(&mut self, query: &[f32]) {
        self.query.clear();
        self.query.extend_from_slice(query);
        // For inner product the code term ⟨q, r⟩ uses the query subvectors
        // directly, residual or not; one table serves every cell.
        if !self.by_residual || self.metric == Metric::InnerProduct {
            self.lut = self.pq.build_lut(&self.query, self.metric);
        }
    }

    /// Fix the probed cell and its coarse distance.
    pub fn set_list(&mut self, list_no: i64, coarse_dis: f32) {
        match self.metric {
            Metric::L2 => {
                if self.by_residual {
                    let residual = self.coarse.compute_residual(&self.query, list_no);
                    self.lut = self.pq.build_lut(&residual, Metric::L2);
                }
                self.dis0 = 0.0;
            }
            Metric::InnerProduct => {
                self.dis0 = if self.by_residual { coarse_dis } else { 0.0 };
            }
        }
    }

    /// Scan a `(vids, codes)` pair, pushing survivors into `heap`.
    ///
    /// Skips invalidated slots (vid `< 0`), tombstoned docids, and docids
    /// outside the range filter. Returns the number of heap pushes.
    pub fn scan_codes(&self, vids: &[i64], codes: &[u8], heap: &mut TopHeap<C>) -> usize {
        let code_size = self.pq.code_size();
        let mut pushes = 0;
        for (i, &vid) in vids.iter().enumerate() {
            if vid < 0 {
                continue;
            }
            let docid = self.store.vid2docid(vid);
            if self.bitmap.test(docid) {
                continue;
            }
            if let Some(range) = self.range {
                if !range.has(docid) {
                    continue;
                }
            }
            let code = &codes[i * code_size..(i + 1) * code_size];
            let dis = self.dis0 + self.pq.lut_distance(&self.lut, code);
            if heap.push(dis, vid) {
                pushes += 1;
            }
        }
        pushes
    }
}
