//! Distance metrics for dense vectors.
//!
//! The engine supports two metrics. For L2 the squared distance is used
//! everywhere (same ordering, no sqrt); for inner product the raw dot
//! product is the similarity and *larger is better*. Heap orderings and
//! coarse-probe sort directions differ accordingly, see [`crate::heap`].

use crate::simd;

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// Squared Euclidean distance. Smaller is better.
    #[default]
    L2,
    /// Inner product similarity. Larger is better.
    InnerProduct,
}

impl Metric {
    /// Compute the metric value between two vectors.
    #[inline]
    #[must_use]
    pub fn compute(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => simd::l2_sqr(a, b),
            Metric::InnerProduct => simd::dot(a, b),
        }
    }

    /// True when `a` is a strictly better value than `b` under this metric.
    #[inline]
    #[must_use]
    pub fn is_better(self, a: f32, b: f32) -> bool {
        match self {
            Metric::L2 => a < b,
            Metric::InnerProduct => a > b,
        }
    }
}
