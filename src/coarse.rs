//! Coarse quantizer: flat centroid table over the index dimension.
//!
//! Partitions the vector space into `nlist` Voronoi cells. Ingestion asks
//! for the single nearest centroid (`assign`) and the residual against it;
//! search asks for the `nprobe` nearest centroids per query.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::kmeans::KMeans;
use crate::{simd, Metric};

/// Flat centroid index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseQuantizer {
    dimension: usize,
    nlist: usize,
    /// Centroids, flat `nlist x dimension`. Empty until trained.
    centroids: Vec<f32>,
    seed: Option<u64>,
}

impl CoarseQuantizer {
    /// Create an untrained quantizer with `nlist` cells.
    pub fn new(dimension: usize, nlist: usize) -> Result<Self> {
        if dimension == 0 || nlist == 0 {
            return Err(EngineError::InvalidParameter(
                "dimension and nlist must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            nlist,
            centroids: Vec::new(),
            seed: None,
        })
    }

    /// Configure a deterministic training seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of cells.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// True once centroids are populated.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Train centroids on `n` rows of `vectors`.
    pub fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        let mut km = KMeans::new(self.dimension, self.nlist)?;
        if let Some(seed) = self.seed {
            km = km.with_seed(seed);
        }
        km.fit(vectors, n)?;
        self.centroids = km.centroids().to_vec();
        Ok(())
    }

    /// Nearest cell per row, `-1` when no centroid is representable.
    #[must_use]
    pub fn assign(&self, vectors: &[f32], n: usize) -> Vec<i64> {
        let d = self.dimension;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let vec = &vectors[i * d..(i + 1) * d];
            let mut best = -1i64;
            let mut best_dist = f32::INFINITY;
            for (cell, centroid) in self.centroids.chunks_exact(d).enumerate() {
                let dist = simd::l2_sqr(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = cell as i64;
                }
            }
            out.push(best);
        }
        out
    }

    /// Residual `x - centroid(list_no)`. Only defined for `list_no >= 0`.
    #[must_use]
    pub fn compute_residual(&self, vector: &[f32], list_no: i64) -> Vec<f32> {
        debug_assert!(list_no >= 0 && (list_no as usize) < self.nlist);
        let centroid = self.centroid(list_no as usize);
        vector
            .iter()
            .zip(centroid.iter())
            .map(|(x, c)| x - c)
            .collect()
    }

    /// Top-`nprobe` cells per query under `metric`.
    ///
    /// Returns `(ids, distances)`, each `n * nprobe`, sorted best-first
    /// (ascending for L2, descending for inner product) and `-1`-padded
    /// when fewer than `nprobe` cells exist.
    #[must_use]
    pub fn search(
        &self,
        queries: &[f32],
        n: usize,
        nprobe: usize,
        metric: Metric,
    ) -> (Vec<i64>, Vec<f32>) {
        let d = self.dimension;
        let mut ids = vec![-1i64; n * nprobe];
        let mut dists = vec![0.0f32; n * nprobe];

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(self.nlist);
        for i in 0..n {
            let query = &queries[i * d..(i + 1) * d];
            scored.clear();
            scored.extend(
                self.centroids
                    .chunks_exact(d)
                    .enumerate()
                    .map(|(cell, centroid)| (cell, metric.compute(query, centroid))),
            );
            match metric {
                Metric::L2 => scored.sort_unstable_by(|a, b| a.1.total_cmp(&b.1)),
                Metric::InnerProduct => scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1)),
            }

            for (slot, &(cell, dist)) in scored.iter().take(nprobe).enumerate() {
                ids[i * nprobe + slot] = cell as i64;
                dists[i * nprobe + slot] = dist;
            }
        }

        (ids, dists)
    }

    /// Centroid of one cell.
    #[must_use]
    pub fn centroid(&self, list_no: usize) -> &[f32] {
        &self.centroids[list_no * self.dimension..(list_no + 1) * self.dimension]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained_quantizer() -> CoarseQuantizer {
        // Four well-separated cells in 2d.
        let mut vectors = Vec::new();
        for i in 0..64 {
            let (cx, cy) = match i % 4 {
                0 => (0.0, 0.0),
                1 => (10.0, 0.0),
                2 => (0.0, 10.0),
                _ => (10.0, 10.0),
            };
            vectors.extend_from_slice(&[cx + (i as f32) * 1e-3, cy]);
        }
        let mut cq = CoarseQuantizer::new(2, 4).unwrap().with_seed(11);
        cq.train(&vectors, 64).unwrap();
        cq
    }

    #[test]
    fn assign_picks_nearest_cell() {
        let cq = trained_quantizer();
        let idx = cq.assign(&[0.1, 0.1, 9.8, 9.9], 2);
        assert_ne!(idx[0], idx[1]);
        assert!(idx.iter().all(|&i| i >= 0));
    }

    #[test]
    fn residual_cancels_centroid() {
        let cq = trained_quantizer();
        let query = [9.7f32, 0.2];
        let idx = cq.assign(&query, 1)[0];
        let residual = cq.compute_residual(&query, idx);
        let centroid = cq.centroid(idx as usize);
        for ((r, c), q) in residual.iter().zip(centroid.iter()).zip(query.iter()) {
            assert!((r + c - q).abs() < 1e-6);
        }
    }

    #[test]
    fn search_orders_by_metric() {
        let cq = trained_quantizer();
        let query = [0.0f32, 0.0];

        let (ids, dists) = cq.search(&query, 1, 4, Metric::L2);
        assert_eq!(ids[0], cq.assign(&query, 1)[0]);
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));

        let (_, ip_dists) = cq.search(&query, 1, 4, Metric::InnerProduct);
        assert!(ip_dists.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn search_pads_when_nprobe_exceeds_nlist() {
        let cq = trained_quantizer();
        let (ids, _) = cq.search(&[0.0, 0.0], 1, 6, Metric::L2);
        assert_eq!(ids.iter().filter(|&&i| i >= 0).count(), 4);
        assert_eq!(ids[4], -1);
        assert_eq!(ids[5], -1);
    }
}
