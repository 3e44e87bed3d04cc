//! IVF-PQ engine: training, realtime ingestion, and two-stage search.
//!
//! The engine orchestrates every other component. Ingestion pulls freshly
//! stored vectors out of the raw store, assigns each to its coarse cell,
//! encodes the residual, and appends the `(vid, code)` entry to the
//! realtime inverted index; the same tick drives cooperative bucket
//! compaction and drains the updated-vid stream. Search runs a coarse
//! probe over `nprobe` cells, scans their codes into a `recall_num`-sized
//! candidate pool, then re-ranks candidates with exact distances over the
//! raw vectors before the final top-k is remapped from vids to docids.
//!
//! Two fork-join layouts cover the search critical section: parallelize
//! across queries (each worker owns its heaps) or across the probed lists
//! of a single query (thread-local heaps merged once per query). Training
//! and ingestion stay single-threaded; an external driver calls
//! [`IvfPqEngine::add_rt_vecs_to_index`] periodically to make progress.

pub mod condition;
pub mod scanner;

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::coarse::CoarseQuantizer;
use crate::error::{EngineError, Result};
use crate::heap::{Comparator, IpSmallest, L2Furthest, TopHeap};
use crate::pq::{ProductQuantizer, MAX_TRAINING_VECTORS, MIN_TRAINING_VECTORS};
use crate::rt::{InvertedListView, RealtimeInvertIndex};
use crate::store::{DocidBitmap, RawVectorStore};
use crate::Metric;

use self::condition::{SearchCondition, SearchResult, SearchStats};
use self::scanner::IvfPqScanner;

/// Catch-up ingestion batch size.
const MAX_NUM_PER_INDEX: usize = 1000;
/// Updated-vid drain cap per tick.
const MAX_UPDATES_PER_TICK: usize = 20_000;
/// Range filters below this many docids take the retrieve-codes fast path.
const RANGE_FAST_PATH_LIMIT: usize = 50_000;

/// Construction-time engine parameters.
#[derive(Debug, Clone)]
pub struct IvfPqParams {
    /// Index dimension `d`; vectors of smaller `raw_d` are zero-padded.
    pub dimension: usize,
    /// Number of coarse cells.
    pub nlist: usize,
    /// PQ subquantizer count; a code is `m` bytes.
    pub m: usize,
    /// Bits per PQ index; only 8 is supported.
    pub nbits_per_idx: usize,
    /// Cells probed per query.
    pub nprobe: usize,
    /// Encode residuals against the assigned centroid instead of raw
    /// vectors.
    pub by_residual: bool,
    /// Per-query scanned-code budget, 0 for unlimited. Applies to the
    /// parallel-over-queries mode only.
    pub max_codes: usize,
    /// Per-bucket pre-allocation of the realtime index.
    pub bucket_keys: usize,
    /// Hard per-bucket entry cap.
    pub bucket_keys_limit: usize,
    /// Deterministic training seed.
    pub training_seed: Option<u64>,
}

impl Default for IvfPqParams {
    fn default() -> Self {
        Self {
            dimension: 0,
            nlist: 1024,
            m: 8,
            nbits_per_idx: 8,
            nprobe: 80,
            by_residual: true,
            max_codes: 0,
            bucket_keys: 10_000,
            bucket_keys_limit: 1_280_000,
            training_seed: None,
        }
    }
}

/// Realtime IVF-PQ index engine.
pub struct IvfPqEngine {
    params: IvfPqParams,
    raw_d: usize,
    store: Arc<RawVectorStore>,
    bitmap: Arc<DocidBitmap>,
    coarse: CoarseQuantizer,
    pq: ProductQuantizer,
    rt: Arc<RealtimeInvertIndex>,
    view: InvertedListView,
    is_trained: bool,
    indexed_vec_count: usize,
    compaction: bool,
    compact_bucket_no: usize,
    compacted_num: usize,
    updated_num: usize,
}

impl IvfPqEngine {
    /// Create an untrained engine over shared store and bitmap handles.
    pub fn new(
        store: Arc<RawVectorStore>,
        bitmap: Arc<DocidBitmap>,
        params: IvfPqParams,
    ) -> Result<Self> {
        let raw_d = store.dimension();
        if params.dimension < raw_d {
            return Err(EngineError::InvalidParameter(format!(
                "index dimension {} below vector dimension {raw_d}",
                params.dimension
            )));
        }
        if store.max_vector_size() > params.bucket_keys_limit * params.nlist {
            warn!(
                expected = store.max_vector_size(),
                capacity = params.bucket_keys_limit * params.nlist,
                "expected vector footprint exceeds bucket capacity"
            );
        }

        let mut coarse = CoarseQuantizer::new(params.dimension, params.nlist)?;
        let mut pq = ProductQuantizer::new(params.dimension, params.m, params.nbits_per_idx)?;
        if let Some(seed) = params.training_seed {
            coarse = coarse.with_seed(seed);
            pq = pq.with_seed(seed.wrapping_add(1));
        }

        let rt = Arc::new(RealtimeInvertIndex::new(
            params.nlist,
            pq.code_size(),
            params.bucket_keys,
            params.bucket_keys_limit,
            Arc::clone(&bitmap),
            Arc::clone(&store),
        ));
        rt.init();
        let view = InvertedListView::new(Arc::clone(&rt));

        Ok(Self {
            params,
            raw_d,
            store,
            bitmap,
            coarse,
            pq,
            rt,
            view,
            is_trained: false,
            compaction: false,
            compact_bucket_no: 0,
            compacted_num: 0,
            updated_num: 0,
            indexed_vec_count: 0,
        })
    }

    /// True once codebooks and centroids are trained.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Vids absorbed into the inverted index so far.
    #[must_use]
    pub fn indexed_vec_count(&self) -> usize {
        self.indexed_vec_count
    }

    /// True while a compaction sweep is in progress.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.compaction
    }

    /// Entries physically removed by compaction so far.
    #[must_use]
    pub fn compacted_num(&self) -> usize {
        self.compacted_num
    }

    /// Updated vids re-indexed so far.
    #[must_use]
    pub fn updated_num(&self) -> usize {
        self.updated_num
    }

    /// Engine parameters.
    #[must_use]
    pub fn params(&self) -> &IvfPqParams {
        &self.params
    }

    /// Train the coarse centroids and PQ codebooks from the leading stored
    /// vectors.
    ///
    /// Requires at least 8192 stored vectors and samples at most the first
    /// 100 000. A second call is a no-op.
    pub fn indexing(&mut self) -> Result<()> {
        if self.is_trained {
            info!("index is already trained, skipping");
            return Ok(());
        }
        let count = self.store.vector_num();
        if count < MIN_TRAINING_VECTORS {
            return Err(EngineError::InsufficientTrainingData {
                got: count,
                need: MIN_TRAINING_VECTORS,
            });
        }
        let num = count.min(MAX_TRAINING_VECTORS);
        let block = self.lifted_block(0, num);

        self.coarse.train(&block, num)?;
        let to_encode = if self.params.by_residual {
            let idx = self.coarse.assign(&block, num);
            self.residual_block(&block, num, &idx)
        } else {
            block
        };
        self.pq.train(&to_encode, num)?;

        self.is_trained = true;
        info!(trained_on = num, "training complete");
        Ok(())
    }

    /// One ingestion tick: catch up on unindexed vectors, otherwise make
    /// compaction progress, then drain the updated-vid stream.
    pub fn add_rt_vecs_to_index(&mut self) -> Result<()> {
        let total_stored_vecs = self.store.vector_num();
        if self.indexed_vec_count > total_stored_vecs {
            error!(
                indexed = self.indexed_vec_count,
                stored = total_stored_vecs,
                "indexed count ahead of stored count"
            );
            return Err(EngineError::InvariantViolation(format!(
                "indexed_vec_count {} exceeds stored vectors {total_stored_vecs}",
                self.indexed_vec_count
            )));
        }

        if self.indexed_vec_count == total_stored_vecs {
            self.compaction_tick()?;
        } else {
            while self.indexed_vec_count < total_stored_vecs {
                let start = self.indexed_vec_count;
                let count = (total_stored_vecs - start).min(MAX_NUM_PER_INDEX);
                let block = self.lifted_block(start, start + count);
                self.add(count, &block)?;
            }
        }

        self.add_updated_vecs_to_index()
    }

    fn compaction_tick(&mut self) -> Result<()> {
        if !self.compaction {
            let delete_num = self.bitmap.delete_num();
            if self.rt.compactable(delete_num) {
                info!(delete_num, "beginning compaction");
                self.compaction = true;
            }
        }
        if self.compaction {
            while self.compact_bucket_no < self.params.nlist {
                // Fresh arrivals win over compaction; resume next tick.
                if self.store.vector_num() > self.indexed_vec_count {
                    break;
                }
                self.compacted_num += self.rt.compact_bucket(self.compact_bucket_no)?;
                self.compact_bucket_no += 1;
            }
            if self.compact_bucket_no == self.params.nlist {
                self.compaction = false;
                self.compact_bucket_no = 0;
                info!(compacted = self.compacted_num, "compaction complete");
            }
        }
        Ok(())
    }

    /// Assign, encode, and append a block of `n` vectors (already lifted
    /// to the index dimension). Vids are handed out to every input, so
    /// the indexed count stays aligned with store slots even when a
    /// vector has no representable cell.
    fn add(&mut self, n: usize, block: &[f32]) -> Result<()> {
        let idx = self.coarse.assign(block, n);
        let to_encode = if self.params.by_residual {
            self.residual_block(block, n, &idx)
        } else {
            block.to_vec()
        };
        let codes = self.pq.compute_codes(&to_encode, n)?;
        let code_size = self.pq.code_size();

        let mut groups: HashMap<usize, (Vec<i64>, Vec<u8>)> = HashMap::new();
        let mut vid = self.indexed_vec_count as i64;
        let mut n_ignore = 0usize;
        for i in 0..n {
            let key = idx[i];
            if key < 0 {
                n_ignore += 1;
                vid += 1;
                continue;
            }
            let slot = groups.entry(key as usize).or_default();
            slot.0.push(vid);
            slot.1
                .extend_from_slice(&codes[i * code_size..(i + 1) * code_size]);
            vid += 1;
        }
        if n_ignore > 0 {
            warn!(n_ignore, "vectors had no representable cell, left unindexed");
        }

        self.rt.add_keys(groups)?;
        self.indexed_vec_count = vid as usize;
        Ok(())
    }

    /// Drain up to 20 000 vids from the updated stream, re-assigning and
    /// re-encoding each.
    fn add_updated_vecs_to_index(&mut self) -> Result<()> {
        let mut vids = Vec::new();
        while let Some(vid) = self.store.try_dequeue_updated() {
            vids.push(vid);
            if vids.len() >= MAX_UPDATES_PER_TICK {
                break;
            }
        }
        if vids.is_empty() {
            return Ok(());
        }

        let rows = self.store.gets(&vids);
        for (&vid, row) in vids.iter().zip(rows.iter()) {
            let row = row.as_deref().ok_or_else(|| {
                EngineError::UpdateFailure(format!("updated vid {vid} has no stored vector"))
            })?;
            let lifted_row;
            let vec: &[f32] = if self.params.dimension > self.raw_d {
                lifted_row = convert_vector_dim(row, 1, self.raw_d, self.params.dimension);
                &lifted_row
            } else {
                row
            };

            let idx = self.coarse.assign(vec, 1)[0];
            let to_encode = if self.params.by_residual {
                if idx >= 0 {
                    self.coarse.compute_residual(vec, idx)
                } else {
                    vec![0.0; self.params.dimension]
                }
            } else {
                vec.to_vec()
            };
            let code = self
                .pq
                .compute_codes(&to_encode, 1)
                .map_err(|e| EngineError::UpdateFailure(e.to_string()))?;
            self.rt.update(idx, vid, &code)?;
        }

        self.updated_num += vids.len();
        info!(drained = vids.len(), total = self.updated_num, "updates re-indexed");
        Ok(())
    }

    /// Two-stage search over `queries` (flat rows of the raw dimension).
    ///
    /// Results are remapped to docids, deduplicated per query, and
    /// `(-1, -1)`-padded.
    pub fn search(&self, queries: &[f32], condition: &SearchCondition) -> Result<SearchResult> {
        if queries.is_empty() || queries.len() % self.raw_d != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: self.raw_d,
                got: queries.len(),
            });
        }
        if condition.topn == 0 {
            return Err(EngineError::InvalidParameter("topn must be positive".into()));
        }
        let n = queries.len() / self.raw_d;
        let mut result = SearchResult::new(n, condition.topn);

        if condition.use_direct_search {
            match condition.metric {
                Metric::L2 => self.search_directly::<L2Furthest>(n, queries, condition, &mut result),
                Metric::InnerProduct => {
                    self.search_directly::<IpSmallest>(n, queries, condition, &mut result)
                }
            }
        } else {
            if !self.is_trained {
                return Err(EngineError::NotTrained);
            }
            let lifted;
            let x: &[f32] = if self.params.dimension > self.raw_d {
                lifted = convert_vector_dim(queries, n, self.raw_d, self.params.dimension);
                &lifted
            } else {
                queries
            };
            match condition.metric {
                Metric::L2 => {
                    self.search_ivfpq::<L2Furthest>(n, x, queries, condition, &mut result)
                }
                Metric::InnerProduct => {
                    self.search_ivfpq::<IpSmallest>(n, x, queries, condition, &mut result)
                }
            }
        }

        self.remap(&mut result);
        Ok(result)
    }

    fn search_ivfpq<C: Comparator>(
        &self,
        n: usize,
        x: &[f32],
        x_raw: &[f32],
        cond: &SearchCondition,
        result: &mut SearchResult,
    ) {
        let d = self.params.dimension;
        let nprobe = self.params.nprobe.clamp(1, self.params.nlist);
        let recall = cond.recall_num.max(cond.topn);
        let k = cond.topn;

        let (keys, coarse_dis) = self.coarse.search(x, n, nprobe, cond.metric);

        // Small range filters bypass the live buckets entirely: expand the
        // docids to vids once and scan only those codes.
        if let Some(range) = cond.range_query_result.as_ref() {
            if range.len() < RANGE_FAST_PATH_LIMIT {
                let mut vid_list = Vec::with_capacity(range.len());
                for &docid in range.docids() {
                    if self.bitmap.test(docid) {
                        continue;
                    }
                    vid_list.extend(self.store.docid2vid(docid));
                }
                let (bucket_codes, bucket_vids) = self.rt.retrieve_codes(&vid_list);

                let scan_query = |i: usize| -> (Vec<f32>, Vec<i64>, SearchStats) {
                    let mut scanner = self.make_scanner::<C>(cond);
                    scanner.set_query(&x[i * d..(i + 1) * d]);
                    let mut heap = TopHeap::<C>::new(recall);
                    let mut stats = SearchStats::default();
                    for ik in 0..nprobe {
                        let key = keys[i * nprobe + ik];
                        if key < 0 {
                            continue;
                        }
                        let vids = &bucket_vids[key as usize];
                        if vids.is_empty() {
                            continue;
                        }
                        scanner.set_list(key, coarse_dis[i * nprobe + ik]);
                        stats.nlistv += 1;
                        stats.ndis += vids.len();
                        stats.nheap +=
                            scanner.scan_codes(vids, &bucket_codes[key as usize], &mut heap);
                    }
                    let (dis_row, id_row) =
                        self.rerank::<C>(&x_raw[i * self.raw_d..(i + 1) * self.raw_d], cond, heap, k);
                    (dis_row, id_row, stats)
                };

                let do_parallel = cond.parallel_based_on_query && n > 1;
                let outputs: Vec<_> = if do_parallel {
                    (0..n).into_par_iter().map(scan_query).collect()
                } else {
                    (0..n).map(scan_query).collect()
                };
                let total = range.len() as i64;
                for (i, (dis_row, id_row, stats)) in outputs.into_iter().enumerate() {
                    result.dists[i * k..(i + 1) * k].copy_from_slice(&dis_row);
                    result.docids[i * k..(i + 1) * k].copy_from_slice(&id_row);
                    result.total[i] = total;
                    result.stats.merge(stats);
                }
                return;
            }
        }

        let ni_total = cond
            .range_query_result
            .as_ref()
            .map(|r| r.len() as i64)
            .unwrap_or(-1);

        if cond.parallel_based_on_query {
            // Mode 0: each worker owns a query and scans its probes
            // serially; heaps are private, no synchronization.
            let max_codes = self.params.max_codes;
            let scan_query = |i: usize| -> (Vec<f32>, Vec<i64>, SearchStats) {
                let mut scanner = self.make_scanner::<C>(cond);
                scanner.set_query(&x[i * d..(i + 1) * d]);
                let mut heap = TopHeap::<C>::new(recall);
                let mut stats = SearchStats::default();
                let mut nscan = 0usize;
                for ik in 0..nprobe {
                    nscan += self.scan_one_list(
                        &mut scanner,
                        keys[i * nprobe + ik],
                        coarse_dis[i * nprobe + ik],
                        &mut heap,
                        &mut stats,
                    );
                    if max_codes > 0 && nscan >= max_codes {
                        break;
                    }
                }
                let (dis_row, id_row) =
                    self.rerank::<C>(&x_raw[i * self.raw_d..(i + 1) * self.raw_d], cond, heap, k);
                (dis_row, id_row, stats)
            };

            let outputs: Vec<_> = if n > 1 {
                (0..n).into_par_iter().map(scan_query).collect()
            } else {
                (0..n).map(scan_query).collect()
            };
            for (i, (dis_row, id_row, stats)) in outputs.into_iter().enumerate() {
                result.dists[i * k..(i + 1) * k].copy_from_slice(&dis_row);
                result.docids[i * k..(i + 1) * k].copy_from_slice(&id_row);
                result.total[i] = ni_total;
                result.stats.merge(stats);
            }
        } else {
            // Mode 1: queries run serially; each query's probes fan out
            // into thread-local heaps merged once at the end.
            for i in 0..n {
                let xi = &x[i * d..(i + 1) * d];
                let (heap, stats) = if nprobe > 1 {
                    (0..nprobe)
                        .into_par_iter()
                        .fold(
                            || {
                                (
                                    None::<IvfPqScanner<'_, C>>,
                                    TopHeap::<C>::new(recall),
                                    SearchStats::default(),
                                )
                            },
                            |(mut scanner, mut heap, mut stats), ik| {
                                let sc = scanner.get_or_insert_with(|| {
                                    let mut sc = self.make_scanner::<C>(cond);
                                    sc.set_query(xi);
                                    sc
                                });
                                self.scan_one_list(
                                    sc,
                                    keys[i * nprobe + ik],
                                    coarse_dis[i * nprobe + ik],
                                    &mut heap,
                                    &mut stats,
                                );
                                (scanner, heap, stats)
                            },
                        )
                        .map(|(_, heap, stats)| (heap, stats))
                        .reduce(
                            || (TopHeap::<C>::new(recall), SearchStats::default()),
                            |(mut ha, mut sa), (hb, sb)| {
                                ha.add_from(&hb);
                                sa.merge(sb);
                                (ha, sa)
                            },
                        )
                } else {
                    let mut scanner = self.make_scanner::<C>(cond);
                    scanner.set_query(xi);
                    let mut heap = TopHeap::<C>::new(recall);
                    let mut stats = SearchStats::default();
                    for ik in 0..nprobe {
                        self.scan_one_list(
                            &mut scanner,
                            keys[i * nprobe + ik],
                            coarse_dis[i * nprobe + ik],
                            &mut heap,
                            &mut stats,
                        );
                    }
                    (heap, stats)
                };

                let (dis_row, id_row) =
                    self.rerank::<C>(&x_raw[i * self.raw_d..(i + 1) * self.raw_d], cond, heap, k);
                result.dists[i * k..(i + 1) * k].copy_from_slice(&dis_row);
                result.docids[i * k..(i + 1) * k].copy_from_slice(&id_row);
                result.total[i] = ni_total;
                result.stats.merge(stats);
            }
        }
    }

    /// Scan one live bucket into `heap`, returning the codes scanned.
    fn scan_one_list<C: Comparator>(
        &self,
        scanner: &mut IvfPqScanner<'_, C>,
        key: i64,
        coarse_dis: f32,
        heap: &mut TopHeap<C>,
        stats: &mut SearchStats,
    ) -> usize {
        if key < 0 {
            // Not enough centroids for the full multiprobe.
            return 0;
        }
        let Some(list) = self.view.get_list(key as usize) else {
            return 0;
        };
        if list.is_empty() {
            return 0;
        }
        scanner.set_list(key, coarse_dis);
        stats.nlistv += 1;
        stats.nheap += scanner.scan_codes(list.ids(), list.codes(), heap);
        let scanned = list.len();
        stats.ndis += scanned;
        scanned
    }

    /// Second stage: exact re-ranking of the recall pool, or pass-through
    /// of quantizer distances when ranking is off.
    fn rerank<C: Comparator>(
        &self,
        xi_raw: &[f32],
        cond: &SearchCondition,
        recall_heap: TopHeap<C>,
        k: usize,
    ) -> (Vec<f32>, Vec<i64>) {
        if cond.has_rank {
            let (_, rids) = recall_heap.entries();
            let rows = self.store.gets(rids);
            let mut heap = TopHeap::<C>::new(k);
            for (&vid, row) in rids.iter().zip(rows.iter()) {
                if vid < 0 {
                    continue;
                }
                let Some(row) = row else { continue };
                let dis = cond.metric.compute(xi_raw, row);
                if cond.range_accepts(dis) {
                    heap.push(dis, vid);
                }
            }
            order_final(heap, cond.sort_by_docid)
        } else {
            let (rdis, rids) = recall_heap.into_sorted();
            let mut dis_row = vec![C::SENTINEL; k];
            let mut id_row = vec![-1i64; k];
            let mut pos = 0;
            for (&dis, &vid) in rdis.iter().zip(rids.iter()) {
                if vid < 0 || !cond.range_accepts(dis) {
                    continue;
                }
                if pos == k {
                    break;
                }
                dis_row[pos] = dis;
                id_row[pos] = vid;
                pos += 1;
            }
            (dis_row, id_row)
        }
    }

    /// Brute-force scan of the raw store, bypassing the inverted index.
    fn search_directly<C: Comparator>(
        &self,
        n: usize,
        queries: &[f32],
        cond: &SearchCondition,
        result: &mut SearchResult,
    ) {
        let raw_d = self.raw_d;
        let k = cond.topn;
        let snapshot = self.store.snapshot();
        let num_vectors = snapshot.vector_num();
        let range = cond.range_query_result.as_ref();
        let ni_total = range.map(|r| r.len() as i64).unwrap_or(-1);

        let scan_rows = |xi: &[f32], lo: usize, hi: usize, heap: &mut TopHeap<C>| -> usize {
            let mut scanned = 0usize;
            for vid in lo..hi {
                let docid = snapshot.docid_of(vid);
                if self.bitmap.test(docid) {
                    continue;
                }
                if let Some(r) = range {
                    if !r.has(docid) {
                        continue;
                    }
                }
                let dis = cond.metric.compute(xi, snapshot.row(vid));
                if !cond.range_accepts(dis) {
                    continue;
                }
                heap.push(dis, vid as i64);
                scanned += 1;
            }
            scanned
        };

        if cond.parallel_based_on_query {
            let scan_query = |i: usize| -> (Vec<f32>, Vec<i64>, usize) {
                let xi = &queries[i * raw_d..(i + 1) * raw_d];
                let mut heap = TopHeap::<C>::new(k);
                let ndis = scan_rows(xi, 0, num_vectors, &mut heap);
                let (dis_row, id_row) = order_final(heap, cond.sort_by_docid);
                (dis_row, id_row, ndis)
            };
            let outputs: Vec<_> = if n > 1 {
                (0..n).into_par_iter().map(scan_query).collect()
            } else {
                (0..n).map(scan_query).collect()
            };
            for (i, (dis_row, id_row, ndis)) in outputs.into_iter().enumerate() {
                result.dists[i * k..(i + 1) * k].copy_from_slice(&dis_row);
                result.docids[i * k..(i + 1) * k].copy_from_slice(&id_row);
                result.total[i] = ni_total;
                result.stats.ndis += ndis;
            }
        } else {
            // Parallelize across contiguous vector ranges, one per worker.
            let num_threads = rayon::current_num_threads().max(1);
            let chunk = num_vectors.div_ceil(num_threads).max(1);
            for i in 0..n {
                let xi = &queries[i * raw_d..(i + 1) * raw_d];
                let (heap, ndis) = (0..num_vectors)
                    .into_par_iter()
                    .step_by(chunk)
                    .map(|lo| {
                        let hi = (lo + chunk).min(num_vectors);
                        let mut heap = TopHeap::<C>::new(k);
                        let ndis = scan_rows(xi, lo, hi, &mut heap);
                        (heap, ndis)
                    })
                    .reduce(
                        || (TopHeap::<C>::new(k), 0),
                        |(mut ha, na), (hb, nb)| {
                            ha.add_from(&hb);
                            (ha, na + nb)
                        },
                    );
                let (dis_row, id_row) = order_final(heap, cond.sort_by_docid);
                result.dists[i * k..(i + 1) * k].copy_from_slice(&dis_row);
                result.docids[i * k..(i + 1) * k].copy_from_slice(&id_row);
                result.total[i] = ni_total;
                result.stats.ndis += ndis;
            }
        }
    }

    /// Replace vids with docids, deduplicate per query (first slot wins),
    /// attach source bytes, and pad the tail.
    fn remap(&self, result: &mut SearchResult) {
        let k = result.topn;
        for i in 0..result.n {
            let row = i * k;
            let slots: Vec<(i64, f32)> = (0..k)
                .map(|j| (result.docids[row + j], result.dists[row + j]))
                .collect();

            let mut seen: HashSet<i64> = HashSet::with_capacity(k);
            let mut pos = 0;
            for (vid, dis) in slots {
                if vid < 0 {
                    continue;
                }
                let docid = self.store.vid2docid(vid);
                if docid < 0 || !seen.insert(docid) {
                    continue;
                }
                result.docids[row + pos] = docid;
                result.dists[row + pos] = dis;
                result.sources[row + pos] = self.store.get_source(vid);
                pos += 1;
            }
            for j in pos..k {
                result.docids[row + j] = -1;
                result.dists[row + j] = -1.0;
                result.sources[row + j] = None;
            }
        }
    }

    fn make_scanner<'s, C: Comparator>(&'s self, cond: &'s SearchCondition) -> IvfPqScanner<'s, C> {
        IvfPqScanner::new(
            &self.pq,
            &self.coarse,
            cond.metric,
            self.params.by_residual,
            self.store.as_ref(),
            self.bitmap.as_ref(),
            cond.range_query_result.as_ref(),
        )
    }

    /// Copy rows `[start, end)` out of the store, zero-padded to the index
    /// dimension when it exceeds the raw dimension.
    fn lifted_block(&self, start: usize, end: usize) -> Vec<f32> {
        let header = self.store.get_vector_header(start, end);
        if self.params.dimension > self.raw_d {
            convert_vector_dim(&header, end - start, self.raw_d, self.params.dimension)
        } else {
            header.to_vec()
        }
    }

    fn residual_block(&self, block: &[f32], n: usize, idx: &[i64]) -> Vec<f32> {
        let d = self.params.dimension;
        let mut out = vec![0.0f32; n * d];
        for i in 0..n {
            if idx[i] < 0 {
                continue;
            }
            let residual = self
                .coarse
                .compute_residual(&block[i * d..(i + 1) * d], idx[i]);
            out[i * d..(i + 1) * d].copy_from_slice(&residual);
        }
        out
    }
}

/// Order the final heap: by ascending id when requested, otherwise
/// best-first by distance.
fn order_final<C: Comparator>(heap: TopHeap<C>, sort_by_docid: bool) -> (Vec<f32>, Vec<i64>) {
    if sort_by_docid {
        let (dis, ids) = heap.entries();
        let mut pairs: Vec<(i64, f32)> = ids.iter().copied().zip(dis.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        (
            pairs.iter().map(|&(_, dis)| dis).collect(),
            pairs.iter().map(|&(id, _)| id).collect(),
        )
    } else {
        heap.into_sorted()
    }
}

/// Zero-pad `raw_d`-stride rows into `d`-stride rows.
fn convert_vector_dim(raw: &[f32], n: usize, raw_d: usize, d: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n * d];
    for i in 0..n {
        out[i * d..i * d + raw_d].copy_from_slice(&raw[i * raw_d..(i + 1) * raw_d]);
    }
    out
}
