//! MinHash signatures over fingerprint set bits and LSH banding.
//!
//! A signature holds one `u8` per permutation: the position, within that
//! permutation's window, of the first bit set in the fingerprint. Windows with
//! no set bit yield the sentinel `permutation_length`. Two fingerprints agree
//! on a permutation with probability close to the Jaccard similarity of their
//! set bits.

use std::sync::Arc;

use perceptual::Fingerprint;

use crate::lsh::{LshConfig, PermutationPool};
use crate::IndexError;

/// One LSH bucket key per table.
pub type BucketKeys = Vec<u64>;

/// Computes signatures and bucket keys against a shared permutation pool.
#[derive(Debug, Clone)]
pub struct MinHasher {
    pool: Arc<PermutationPool>,
    tables: usize,
    keys_per_table: usize,
}

impl MinHasher {
    /// Generate the pool described by `cfg` and wrap it.
    pub fn new(cfg: &LshConfig, fingerprint_bits: usize) -> Result<Self, IndexError> {
        let pool = PermutationPool::generate(cfg, fingerprint_bits)?;
        Ok(Self::with_pool(cfg, Arc::new(pool)))
    }

    /// Share an existing pool. `cfg` must be the one the pool was built from.
    pub fn with_pool(cfg: &LshConfig, pool: Arc<PermutationPool>) -> Self {
        Self {
            pool,
            tables: cfg.tables,
            keys_per_table: cfg.keys_per_table,
        }
    }

    pub fn pool(&self) -> &Arc<PermutationPool> {
        &self.pool
    }

    pub fn tables(&self) -> usize {
        self.tables
    }

    pub fn keys_per_table(&self) -> usize {
        self.keys_per_table
    }

    /// Value stored for a permutation whose window holds no set bit.
    pub fn sentinel(&self) -> u8 {
        self.pool.permutation_length() as u8
    }

    /// Per-permutation position of the first set bit.
    pub fn signature(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>, IndexError> {
        if fingerprint.len() != self.pool.fingerprint_bits() {
            return Err(IndexError::FingerprintLength {
                expected: self.pool.fingerprint_bits(),
                actual: fingerprint.len(),
            });
        }
        let sentinel = self.sentinel();
        Ok(self
            .pool
            .iter()
            .map(|perm| {
                perm.iter()
                    .position(|&bit| fingerprint.get(bit as usize))
                    .map_or(sentinel, |pos| pos as u8)
            })
            .collect())
    }

    /// Fold each group of `keys_per_table` consecutive signature values into
    /// one bucket key: byte `k` of table `t`'s key is `signature[t*K + k]`.
    pub fn lsh_buckets(&self, signature: &[u8]) -> BucketKeys {
        signature
            .chunks_exact(self.keys_per_table)
            .take(self.tables)
            .map(|band| {
                band.iter()
                    .enumerate()
                    .fold(0u64, |key, (k, &value)| key | (u64::from(value) << (8 * k)))
            })
            .collect()
    }

    /// Bucket keys for `fingerprint`, or `None` for a silent fingerprint,
    /// which would otherwise land every silent clip in the same buckets.
    pub fn hash(&self, fingerprint: &Fingerprint) -> Result<Option<BucketKeys>, IndexError> {
        if fingerprint.is_silent() {
            return Ok(None);
        }
        let signature = self.signature(fingerprint)?;
        Ok(Some(self.lsh_buckets(&signature)))
    }
}

/// Fraction of permutations on which two signatures agree.
pub fn estimate_jaccard(a: &[u8], b: &[u8]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let agree = a.iter().zip(b).filter(|(x, y)| x == y).count();
    agree as f32 / a.len() as f32
}
