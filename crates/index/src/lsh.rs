//! LSH configuration and the permutation pool shared by inserts and probes.
//!
//! Each permutation is a short ordered window of distinct fingerprint bit
//! positions. The pool is generated from a seed with splitmix64, so the same
//! configuration always yields the same pool regardless of the `rand`
//! version in use. Changing any field invalidates every stored hash bin.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use xxhash_rust::xxh3::xxh3_64;

use crate::IndexError;

pub const DEFAULT_PERMUTATION_SEED: u64 = 0xF00D_BAAD_F00D_BAAD;

/// Largest number of MinHash bytes that fit in one `u64` bucket key.
pub const MAX_KEYS_PER_TABLE: usize = 8;

/// Per-bit reuse counters are `u16`, so the window cannot exceed their range.
pub const MAX_DISJOINT_WINDOW: usize = u16::MAX as usize;

/// LSH banding and permutation pool parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LshConfig {
    /// Number of hash tables (L).
    pub tables: usize,
    /// MinHash values combined into each bucket key (K).
    pub keys_per_table: usize,
    /// Permutations in the pool (P). Must be at least `tables * keys_per_table`.
    pub permutation_count: usize,
    /// Bit positions per permutation; also the "no set bit" sentinel.
    pub permutation_length: usize,
    pub seed: u64,
    /// Recent permutations whose indices a new permutation tries to avoid.
    pub disjoint_window: usize,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            tables: 25,
            keys_per_table: 4,
            permutation_count: 150,
            permutation_length: 255,
            seed: DEFAULT_PERMUTATION_SEED,
            disjoint_window: 32,
        }
    }
}

impl LshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(mut self, tables: usize) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_keys_per_table(mut self, keys_per_table: usize) -> Self {
        self.keys_per_table = keys_per_table;
        self
    }

    pub fn with_permutation_count(mut self, permutation_count: usize) -> Self {
        self.permutation_count = permutation_count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_disjoint_window(mut self, disjoint_window: usize) -> Self {
        self.disjoint_window = disjoint_window;
        self
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.tables == 0 || self.tables > usize::from(u16::MAX) {
            return Err(IndexError::InvalidConfig(format!(
                "tables must be in 1..={} (got {})",
                u16::MAX,
                self.tables
            )));
        }
        if self.keys_per_table == 0 || self.keys_per_table > MAX_KEYS_PER_TABLE {
            return Err(IndexError::InvalidConfig(format!(
                "keys_per_table must be in 1..={MAX_KEYS_PER_TABLE} (got {})",
                self.keys_per_table
            )));
        }
        if self.tables * self.keys_per_table > self.permutation_count {
            return Err(IndexError::InvalidConfig(format!(
                "{} tables x {} keys need {} permutations, pool has {}",
                self.tables,
                self.keys_per_table,
                self.tables * self.keys_per_table,
                self.permutation_count
            )));
        }
        if self.permutation_length == 0 || self.permutation_length > usize::from(u8::MAX) {
            return Err(IndexError::InvalidConfig(format!(
                "permutation_length must be in 1..=255 (got {})",
                self.permutation_length
            )));
        }
        if self.disjoint_window > MAX_DISJOINT_WINDOW {
            return Err(IndexError::InvalidConfig(format!(
                "disjoint_window must be at most {MAX_DISJOINT_WINDOW} (got {})",
                self.disjoint_window
            )));
        }
        Ok(())
    }
}

/// Read-only pool of bit-position permutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationPool {
    fingerprint_bits: usize,
    length: usize,
    permutations: Vec<Vec<u32>>,
    checksum: u64,
}

impl PermutationPool {
    /// Generate the pool for fingerprints of `fingerprint_bits` bits.
    pub fn generate(cfg: &LshConfig, fingerprint_bits: usize) -> Result<Self, IndexError> {
        cfg.validate()?;
        if cfg.permutation_length > fingerprint_bits || fingerprint_bits > u32::MAX as usize {
            return Err(IndexError::InvalidConfig(format!(
                "permutation_length {} does not fit {fingerprint_bits}-bit fingerprints",
                cfg.permutation_length
            )));
        }

        let mut rng = SplitMix64::new(cfg.seed);
        let mut recent_uses = vec![0u16; fingerprint_bits];
        let mut recent: VecDeque<usize> = VecDeque::with_capacity(cfg.disjoint_window + 1);
        let mut permutations: Vec<Vec<u32>> = Vec::with_capacity(cfg.permutation_count);

        for p in 0..cfg.permutation_count {
            let (mut fresh, mut stale): (Vec<u32>, Vec<u32>) =
                (0..fingerprint_bits as u32).partition(|&bit| recent_uses[bit as usize] == 0);

            let mut chosen = take_random(&mut fresh, cfg.permutation_length, &mut rng);
            if chosen.len() < cfg.permutation_length {
                let missing = cfg.permutation_length - chosen.len();
                chosen.extend(take_random(&mut stale, missing, &mut rng));
            }

            if cfg.disjoint_window > 0 {
                for &bit in &chosen {
                    recent_uses[bit as usize] += 1;
                }
                recent.push_back(p);
                if recent.len() > cfg.disjoint_window {
                    if let Some(old) = recent.pop_front() {
                        for &bit in &permutations[old] {
                            recent_uses[bit as usize] -= 1;
                        }
                    }
                }
            }
            permutations.push(chosen);
        }

        let checksum = checksum(&permutations);
        Ok(Self {
            fingerprint_bits,
            length: cfg.permutation_length,
            permutations,
            checksum,
        })
    }

    pub fn len(&self) -> usize {
        self.permutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutations.is_empty()
    }

    /// Bit positions per permutation.
    pub fn permutation_length(&self) -> usize {
        self.length
    }

    pub fn fingerprint_bits(&self) -> usize {
        self.fingerprint_bits
    }

    pub fn permutation(&self, index: usize) -> &[u32] {
        &self.permutations[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.permutations.iter().map(Vec::as_slice)
    }

    /// xxh3 over every index; persisted so a changed pool is detected.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }
}

/// Partial Fisher-Yates: move `count` random elements to the front and
/// return them in draw order.
fn take_random(pool: &mut [u32], count: usize, rng: &mut SplitMix64) -> Vec<u32> {
    let count = count.min(pool.len());
    for i in 0..count {
        let j = i + rng.below((pool.len() - i) as u64) as usize;
        pool.swap(i, j);
    }
    pool[..count].to_vec()
}

fn checksum(permutations: &[Vec<u32>]) -> u64 {
    let bytes: Vec<u8> = permutations
        .iter()
        .flat_map(|perm| perm.iter().flat_map(|bit| bit.to_le_bytes()))
        .collect();
    xxh3_64(&bytes)
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform value in `0..bound` (Lemire's multiply-shift, bias < 2^-32 for small bounds).
    fn below(&mut self, bound: u64) -> u64 {
        ((u128::from(self.next_u64()) * u128::from(bound)) >> 64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_config_is_valid() {
        let cfg = LshConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tables * cfg.keys_per_table, 100);
    }

    #[test]
    fn validate_rejects_wide_keys_and_small_pools() {
        assert!(LshConfig::new().with_keys_per_table(9).validate().is_err());
        assert!(LshConfig::new().with_keys_per_table(0).validate().is_err());
        assert!(LshConfig::new()
            .with_tables(40)
            .with_keys_per_table(4)
            .validate()
            .is_err());
    }

    #[test]
    fn validate_bounds_disjoint_window() {
        let at_limit = LshConfig::new().with_disjoint_window(MAX_DISJOINT_WINDOW);
        assert!(at_limit.validate().is_ok());
        let over = LshConfig::new().with_disjoint_window(MAX_DISJOINT_WINDOW + 1);
        assert!(matches!(over.validate(), Err(IndexError::InvalidConfig(_))));
        assert!(PermutationPool::generate(&over, 8192).is_err());
    }

    #[test]
    fn pool_is_deterministic_for_a_seed() {
        let cfg = LshConfig::default();
        let a = PermutationPool::generate(&cfg, 8192).unwrap();
        let b = PermutationPool::generate(&cfg, 8192).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.checksum(), b.checksum());

        let c = PermutationPool::generate(&cfg.with_seed(1), 8192).unwrap();
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn permutations_hold_distinct_in_range_indices() {
        let pool = PermutationPool::generate(&LshConfig::default(), 8192).unwrap();
        assert_eq!(pool.len(), 150);
        for perm in pool.iter() {
            assert_eq!(perm.len(), 255);
            let unique: HashSet<u32> = perm.iter().copied().collect();
            assert_eq!(unique.len(), 255);
            assert!(perm.iter().all(|&bit| bit < 8192));
        }
    }

    #[test]
    fn recent_permutations_do_not_overlap_while_room_remains() {
        // 8192 / 255 = 32 disjoint windows fit before reuse is forced.
        let pool = PermutationPool::generate(&LshConfig::default(), 8192).unwrap();
        let mut seen = HashSet::new();
        for perm in pool.iter().take(32) {
            for &bit in perm {
                assert!(seen.insert(bit), "bit {bit} reused inside the window");
            }
        }
    }

    #[test]
    fn small_fingerprints_fall_back_to_reuse() {
        let cfg = LshConfig {
            tables: 2,
            keys_per_table: 2,
            permutation_count: 4,
            permutation_length: 10,
            ..Default::default()
        };
        let pool = PermutationPool::generate(&cfg, 16).unwrap();
        assert!(pool.iter().all(|perm| perm.len() == 10));
    }

    #[test]
    fn rejects_permutations_longer_than_fingerprint() {
        assert!(PermutationPool::generate(&LshConfig::default(), 128).is_err());
    }
}
