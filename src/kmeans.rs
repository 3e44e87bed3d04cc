//! k-means clustering over flat row-major storage.
//!
//! Shared by the coarse quantizer (nlist centroids over full vectors) and
//! the product quantizer (one codebook per subvector slice). Uses
//! k-means++ initialization and Lloyd iterations with a convergence break.

use crate::error::{EngineError, Result};
use crate::simd;

const MAX_ITERATIONS: usize = 25;
const CONVERGENCE_EPS: f32 = 1e-6;

/// k-means clustering for flat `n x dimension` vector blocks.
pub struct KMeans {
    /// Centroids, flat `k x dimension`.
    centroids: Vec<f32>,
    dimension: usize,
    k: usize,
    seed: Option<u64>,
}

impl KMeans {
    /// Create new k-means with `k` clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(EngineError::InvalidParameter(
                "dimension and k must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            seed: None,
        })
    }

    /// Configure a deterministic seed for k-means++ initialization.
    ///
    /// When set, repeated `fit(...)` calls on the same inputs produce
    /// identical centroids.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Train on `num_vectors` rows of `vectors`.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if vectors.len() < num_vectors * self.dimension || num_vectors == 0 {
            return Err(EngineError::InvalidParameter(
                "insufficient vectors for k-means".to_string(),
            ));
        }

        self.centroids = self.kmeans_plus_plus(vectors, num_vectors);

        for _iteration in 0..MAX_ITERATIONS {
            let assignments = self.assign(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, num_vectors, &assignments);

            let mut shift = 0.0f32;
            for (old, new) in self
                .centroids
                .chunks_exact(self.dimension)
                .zip(new_centroids.chunks_exact(self.dimension))
            {
                shift = shift.max(simd::l2_sqr(old, new));
            }

            self.centroids = new_centroids;
            if shift < CONVERGENCE_EPS {
                break;
            }
        }

        Ok(())
    }

    /// k-means++ initialization with a running nearest-centroid distance.
    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        let d = self.dimension;
        let mut centroids = Vec::with_capacity(self.k * d);

        let first = rng.random_range(0..num_vectors);
        centroids.extend_from_slice(&vectors[first * d..(first + 1) * d]);

        // Distance of each point to its nearest selected centroid so far.
        let mut min_dist: Vec<f32> = (0..num_vectors)
            .map(|i| simd::l2_sqr(&vectors[i * d..(i + 1) * d], &centroids[..d]))
            .collect();

        for _ in 1..self.k {
            let total: f64 = min_dist.iter().map(|&x| x as f64).sum();
            let chosen = if total > 0.0 {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut pick = num_vectors - 1;
                for (i, &dist) in min_dist.iter().enumerate() {
                    cumulative += dist as f64;
                    if cumulative >= threshold {
                        pick = i;
                        break;
                    }
                }
                pick
            } else {
                // All points coincide with a centroid already.
                rng.random_range(0..num_vectors)
            };

            let start = centroids.len();
            centroids.extend_from_slice(&vectors[chosen * d..(chosen + 1) * d]);
            let new_centroid = &centroids[start..start + d];
            for (i, slot) in min_dist.iter_mut().enumerate() {
                let dist = simd::l2_sqr(&vectors[i * d..(i + 1) * d], new_centroid);
                if dist < *slot {
                    *slot = dist;
                }
            }
        }

        centroids
    }

    /// Assign each row to its nearest centroid.
    pub fn assign(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        let d = self.dimension;
        let mut assignments = Vec::with_capacity(num_vectors);

        for i in 0..num_vectors {
            let vec = &vectors[i * d..(i + 1) * d];
            let mut best_cluster = 0;
            let mut best_dist = f32::INFINITY;
            for (cluster, centroid) in self.centroids.chunks_exact(d).enumerate() {
                let dist = simd::l2_sqr(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = cluster;
                }
            }
            assignments.push(best_cluster);
        }

        assignments
    }

    fn update_centroids(
        &self,
        vectors: &[f32],
        num_vectors: usize,
        assignments: &[usize],
    ) -> Vec<f32> {
        let d = self.dimension;
        let mut sums = vec![0.0f32; self.k * d];
        let mut counts = vec![0usize; self.k];

        for (i, &cluster) in assignments.iter().enumerate().take(num_vectors) {
            counts[cluster] += 1;
            let vec = &vectors[i * d..(i + 1) * d];
            let sum = &mut sums[cluster * d..(cluster + 1) * d];
            for (s, &v) in sum.iter_mut().zip(vec.iter()) {
                *s += v;
            }
        }

        let mut new_centroids = Vec::with_capacity(self.k * d);
        for (cluster, count) in counts.iter().enumerate() {
            if *count > 0 {
                let sum = &sums[cluster * d..(cluster + 1) * d];
                new_centroids.extend(sum.iter().map(|&s| s / *count as f32));
            } else {
                // Empty cluster keeps its previous centroid.
                new_centroids.extend_from_slice(&self.centroids[cluster * d..(cluster + 1) * d]);
            }
        }

        new_centroids
    }

    /// Trained centroids, flat `k x dimension`.
    #[must_use]
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn separates_two_clusters() {
        let mut vectors = Vec::new();
        for i in 0..32 {
            let off = if i % 2 == 0 { 0.0 } else { 10.0 };
            vectors.extend_from_slice(&[off + (i as f32) * 0.01, off]);
        }
        let mut km = KMeans::new(2, 2).unwrap().with_seed(7);
        km.fit(&vectors, 32).unwrap();

        let assignments = km.assign(&vectors, 32);
        for pair in assignments.chunks(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fit_is_deterministic_given_seed(
            seed in any::<u64>(),
            dimension in 1usize..8,
            num_vectors in 2usize..32,
            k in 1usize..8,
            raw in proptest::collection::vec(-1.0f32..1.0f32, 2usize..(32 * 8)),
        ) {
            prop_assume!(k <= num_vectors);
            let needed = num_vectors * dimension;
            prop_assume!(raw.len() >= needed);
            let vectors = &raw[..needed];

            let mut km1 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            let mut km2 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            km1.fit(vectors, num_vectors).unwrap();
            km2.fit(vectors, num_vectors).unwrap();

            prop_assert_eq!(
                km1.assign(vectors, num_vectors),
                km2.assign(vectors, num_vectors)
            );
        }
    }
}
