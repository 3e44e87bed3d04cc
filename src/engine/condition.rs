//! Search request and response types.

use std::collections::HashSet;

use crate::Metric;

/// Pre-filtered docid set attached to a search, typically produced by a
/// numeric range query over the attribute table.
#[derive(Debug, Clone, Default)]
pub struct RangeQueryResult {
    docids: Vec<i64>,
    members: HashSet<i64>,
}

impl RangeQueryResult {
    /// Build from the matching docids.
    #[must_use]
    pub fn from_docids(docids: Vec<i64>) -> Self {
        let members = docids.iter().copied().collect();
        Self { docids, members }
    }

    /// Number of docids in the result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docids.len()
    }

    /// True when no docid matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docids.is_empty()
    }

    /// Membership test.
    #[must_use]
    pub fn has(&self, docid: i64) -> bool {
        self.members.contains(&docid)
    }

    /// The matching docids in query order.
    #[must_use]
    pub fn docids(&self) -> &[i64] {
        &self.docids
    }
}

/// Per-search knobs.
#[derive(Debug, Clone)]
pub struct SearchCondition {
    /// Final results per query.
    pub topn: usize,
    /// Candidate pool fed into the rerank stage; clamped to at least `topn`.
    pub recall_num: usize,
    /// Distance metric.
    pub metric: Metric,
    /// True: parallelize across queries. False: across the probed lists of
    /// each query.
    pub parallel_based_on_query: bool,
    /// Lower distance bound; `-1.0` disables the range predicate together
    /// with `max_dist`.
    pub min_dist: f32,
    /// Upper distance bound.
    pub max_dist: f32,
    /// Order final slots by ascending id instead of by distance.
    pub sort_by_docid: bool,
    /// False skips the exact rerank and returns quantizer-derived
    /// distances.
    pub has_rank: bool,
    /// Optional docid pre-filter.
    pub range_query_result: Option<RangeQueryResult>,
    /// Skip the inverted index and scan the raw store exhaustively.
    pub use_direct_search: bool,
}

impl Default for SearchCondition {
    fn default() -> Self {
        Self {
            topn: 10,
            recall_num: 50,
            metric: Metric::L2,
            parallel_based_on_query: true,
            min_dist: -1.0,
            max_dist: -1.0,
            sort_by_docid: false,
            has_rank: true,
            range_query_result: None,
            use_direct_search: false,
        }
    }
}

impl SearchCondition {
    /// The range predicate applied to every candidate distance: pass when
    /// both bounds are disabled, or when both are set and bracket `dis`.
    #[inline]
    #[must_use]
    pub fn range_accepts(&self, dis: f32) -> bool {
        (self.min_dist == -1.0 && self.max_dist == -1.0)
            || (self.min_dist >= 0.0
                && dis >= self.min_dist
                && self.max_dist >= 0.0
                && dis <= self.max_dist)
    }
}

/// Scan-volume counters aggregated over one search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Non-empty lists visited.
    pub nlistv: usize,
    /// Codes scanned.
    pub ndis: usize,
    /// Heap pushes performed.
    pub nheap: usize,
}

impl SearchStats {
    pub(crate) fn merge(&mut self, other: SearchStats) {
        self.nlistv += other.nlistv;
        self.ndis += other.ndis;
        self.nheap += other.nheap;
    }
}

/// Flat per-query result block.
///
/// Row `i` occupies slots `[i * topn, (i + 1) * topn)`. Unused slots hold
/// docid `-1` and distance `-1.0`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Number of queries.
    pub n: usize,
    /// Slots per query.
    pub topn: usize,
    /// Docids after remapping, `-1`-padded.
    pub docids: Vec<i64>,
    /// Distances aligned with `docids`.
    pub dists: Vec<f32>,
    /// Source blob per slot, when the store has one.
    pub sources: Vec<Option<Vec<u8>>>,
    /// Range candidate-set size per query, `-1` when no range filter ran.
    pub total: Vec<i64>,
    /// Scan counters for the whole call.
    pub stats: SearchStats,
}

impl SearchResult {
    pub(crate) fn new(n: usize, topn: usize) -> Self {
        Self {
            n,
            topn,
            docids: vec![-1; n * topn],
            dists: vec![-1.0; n * topn],
            sources: vec![None; n * topn],
            total: vec![-1; n],
            stats: SearchStats::default(),
        }
    }

    /// Docid slots of query `i`.
    #[must_use]
    pub fn docids_for(&self, i: usize) -> &[i64] {
        &self.docids[i * self.topn..(i + 1) * self.topn]
    }

    /// Distance slots of query `i`.
    #[must_use]
    pub fn dists_for(&self, i: usize) -> &[f32] {
        &self.dists[i * self.topn..(i + 1) * self.topn]
    }
}
