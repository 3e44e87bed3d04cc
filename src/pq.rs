//! Product quantizer: residual compression codebooks.
//!
//! Splits a `d`-dimensional vector into `m` subvectors and quantizes each
//! against its own codebook of `2^nbits` centroids. A stored code is `m`
//! bytes at 8 bits per index. Query-time distances are table lookups: for
//! a query (or query residual), precompute the distance from each query
//! subvector to every subcentroid once, then the distance to any code is
//! `m` additions.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::kmeans::KMeans;
use crate::{simd, Metric};

/// Training refuses to run on fewer rows than this.
pub const MIN_TRAINING_VECTORS: usize = 8192;
/// Training samples at most this many leading rows.
pub const MAX_TRAINING_VECTORS: usize = 100_000;

/// Product quantizer with 8-bit subquantizer indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    m: usize,
    nbits: usize,
    ksub: usize,
    dsub: usize,
    /// Codebooks, flat `m x ksub x dsub`.
    centroids: Vec<f32>,
    seed: Option<u64>,
}

impl ProductQuantizer {
    /// Create an untrained quantizer for `m` subvectors of `dimension / m`
    /// components each.
    pub fn new(dimension: usize, m: usize, nbits: usize) -> Result<Self> {
        if dimension == 0 || m == 0 {
            return Err(EngineError::InvalidParameter(
                "dimension and m must be greater than 0".to_string(),
            ));
        }
        if dimension % m != 0 {
            return Err(EngineError::InvalidParameter(format!(
                "dimension {dimension} not divisible by m {m}"
            )));
        }
        if nbits != 8 {
            return Err(EngineError::InvalidParameter(format!(
                "nbits {nbits} unsupported, codes are 8 bits per index"
            )));
        }
        Ok(Self {
            dimension,
            m,
            nbits,
            ksub: 1 << nbits,
            dsub: dimension / m,
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

    /// Bytes per stored code.
    #[must_use]
    pub fn code_size(&self) -> usize {
        (self.m * self.nbits).div_ceil(8)
    }

    /// Number of subquantizers.
    #[must_use]
    pub fn num_subquantizers(&self) -> usize {
        self.m
    }

    /// Centroids per subquantizer.
    #[must_use]
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    /// True once codebooks are populated.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Train one codebook per subvector slice.
    ///
    /// Fails when fewer than [`MIN_TRAINING_VECTORS`] rows are supplied;
    /// rows past [`MAX_TRAINING_VECTORS`] are ignored.
    pub fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if n < MIN_TRAINING_VECTORS {
            return Err(EngineError::InsufficientTrainingData {
                got: n,
                need: MIN_TRAINING_VECTORS,
            });
        }
        let n = n.min(MAX_TRAINING_VECTORS);
        if vectors.len() < n * self.dimension {
            return Err(EngineError::CodecFailure(
                "training block shorter than row count".to_string(),
            ));
        }

        let mut centroids = vec![0.0f32; self.m * self.ksub * self.dsub];
        let mut subvectors = vec![0.0f32; n * self.dsub];

        for sub in 0..self.m {
            let offset = sub * self.dsub;
            for i in 0..n {
                let row = &vectors[i * self.dimension + offset..];
                subvectors[i * self.dsub..(i + 1) * self.dsub]
                    .copy_from_slice(&row[..self.dsub]);
            }

            let mut km = KMeans::new(self.dsub, self.ksub)?;
            if let Some(seed) = self.seed {
                km = km.with_seed(seed.wrapping_add(sub as u64));
            }
            km.fit(&subvectors, n)?;
            centroids[sub * self.ksub * self.dsub..(sub + 1) * self.ksub * self.dsub]
                .copy_from_slice(km.centroids());
        }

        self.centroids = centroids;
        Ok(())
    }

    /// Encode `n` rows into `n * code_size` bytes. Deterministic and pure.
    pub fn compute_codes(&self, vectors: &[f32], n: usize) -> Result<Vec<u8>> {
        if !self.is_trained() {
            return Err(EngineError::NotTrained);
        }
        if vectors.len() < n * self.dimension {
            return Err(EngineError::CodecFailure(
                "encode block shorter than row count".to_string(),
            ));
        }

        let code_size = self.code_size();
        let mut codes = vec![0u8; n * code_size];
        for i in 0..n {
            let row = &vectors[i * self.dimension..(i + 1) * self.dimension];
            self.encode_one(row, &mut codes[i * code_size..(i + 1) * code_size]);
        }
        Ok(codes)
    }

    fn encode_one(&self, vector: &[f32], code: &mut [u8]) {
        for sub in 0..self.m {
            let subvec = &vector[sub * self.dsub..(sub + 1) * self.dsub];
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for j in 0..self.ksub {
                let dist = simd::l2_sqr(subvec, self.subcentroid(sub, j));
                if dist < best_dist {
                    best_dist = dist;
                    best = j;
                }
            }
            code[sub] = best as u8;
        }
    }

    /// Reconstruct the centroid lattice point a code maps to.
    #[must_use]
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        for (sub, &idx) in code.iter().enumerate().take(self.m) {
            out.extend_from_slice(self.subcentroid(sub, idx as usize));
        }
        out
    }

    /// Build the lookup table for `query` under `metric`.
    ///
    /// Layout is `m x ksub`; the table distance of a code is the sum of one
    /// entry per subquantizer. For L2 the query here is the *residual*
    /// against the probed centroid when encoding is residual-based.
    #[must_use]
    pub fn build_lut(&self, query: &[f32], metric: Metric) -> Vec<f32> {
        let mut lut = Vec::with_capacity(self.m * self.ksub);
        for sub in 0..self.m {
            let subvec = &query[sub * self.dsub..(sub + 1) * self.dsub];
            for j in 0..self.ksub {
                lut.push(metric.compute(subvec, self.subcentroid(sub, j)));
            }
        }
        lut
    }

    /// Table distance of a single code. Only lookups and additions.
    #[inline]
    #[must_use]
    pub fn lut_distance(&self, lut: &[f32], code: &[u8]) -> f32 {
        let mut total = 0.0;
        for (sub, &idx) in code.iter().enumerate().take(self.m) {
            total += lut[sub * self.ksub + idx as usize];
        }
        total
    }

    #[inline]
    fn subcentroid(&self, sub: usize, j: usize) -> &[f32] {
        let start = (sub * self.ksub + j) * self.dsub;
        &self.centroids[start..start + self.dsub]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_block(n: usize, d: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * d).map(|_| rng.random_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn training_floor_is_enforced() {
        let mut pq = ProductQuantizer::new(8, 4, 8).unwrap();
        let block = random_block(MIN_TRAINING_VECTORS - 1, 8, 1);
        let err = pq.train(&block, MIN_TRAINING_VECTORS - 1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientTrainingData { got, need }
                if got == MIN_TRAINING_VECTORS - 1 && need == MIN_TRAINING_VECTORS
        ));

        let block = random_block(MIN_TRAINING_VECTORS, 8, 1);
        pq.train(&block, MIN_TRAINING_VECTORS).unwrap();
        assert!(pq.is_trained());
    }

    #[test]
    fn rejects_unsupported_nbits() {
        assert!(ProductQuantizer::new(8, 4, 4).is_err());
        assert!(ProductQuantizer::new(7, 4, 8).is_err());
    }

    #[test]
    fn decode_reconstructs_subcentroids() {
        let mut pq = ProductQuantizer::new(8, 4, 8).unwrap().with_seed(9);
        let block = random_block(MIN_TRAINING_VECTORS, 8, 2);
        pq.train(&block, MIN_TRAINING_VECTORS).unwrap();

        let codes = pq.compute_codes(&block[..8], 1).unwrap();
        let decoded = pq.decode(&codes);

        // Re-encoding the decoded point must reproduce the code: decoded
        // values sit exactly on the centroid lattice.
        let recoded = pq.compute_codes(&decoded, 1).unwrap();
        assert_eq!(codes, recoded);
    }

    #[test]
    fn lut_distance_matches_direct_l2() {
        let mut pq = ProductQuantizer::new(8, 4, 8).unwrap().with_seed(3);
        let block = random_block(MIN_TRAINING_VECTORS, 8, 4);
        pq.train(&block, MIN_TRAINING_VECTORS).unwrap();

        let query = &block[16..24];
        let codes = pq.compute_codes(&block[..80], 10).unwrap();
        let lut = pq.build_lut(query, Metric::L2);

        for i in 0..10 {
            let code = &codes[i * pq.code_size()..(i + 1) * pq.code_size()];
            let table_dis = pq.lut_distance(&lut, code);
            let direct = simd::l2_sqr(query, &pq.decode(code));
            assert!((table_dis - direct).abs() < 1e-3);
        }
    }
}
