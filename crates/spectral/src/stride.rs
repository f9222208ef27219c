//! Stride policies controlling the offset between consecutive spectral images.
//!
//! Strides are measured in samples. The frame cutter converts them to frame
//! units by dividing by the hop size, so a stride that is not a multiple of
//! the hop is truncated toward zero.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SpectralError;

/// Serializable description of a stride policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrideConfig {
    /// Constant gap of `stride` samples between the end of one image and the
    /// start of the next.
    Static { stride: i64, first: i64 },
    /// Gap drawn uniformly from `[min, max)` for every image.
    Random {
        min: i64,
        max: i64,
        first: i64,
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Consecutive images start `increment` samples apart, regardless of the
    /// image length.
    IncrementalStatic { increment: i64, first: i64 },
    /// Consecutive images start a random `[min, max)` samples apart.
    IncrementalRandom {
        min: i64,
        max: i64,
        first: i64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl StrideConfig {
    /// Corpus-indexing default: images start 5115 samples (~0.93 s at 5512 Hz) apart.
    pub fn insertion_default() -> Self {
        StrideConfig::IncrementalStatic {
            increment: 5115,
            first: 0,
        }
    }

    /// Query default: dense, randomized starts to survive phase misalignment.
    pub fn query_default() -> Self {
        StrideConfig::IncrementalRandom {
            min: 256,
            max: 512,
            first: 0,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), SpectralError> {
        match *self {
            StrideConfig::Static { first, .. } | StrideConfig::IncrementalStatic { first, .. }
                if first < 0 =>
            {
                Err(SpectralError::InvalidStride(format!(
                    "first stride must be >= 0 (got {first})"
                )))
            }
            StrideConfig::IncrementalStatic { increment, .. } if increment <= 0 => Err(
                SpectralError::InvalidStride(format!("increment must be > 0 (got {increment})")),
            ),
            StrideConfig::Random { min, max, first, .. }
            | StrideConfig::IncrementalRandom { min, max, first, .. } => {
                if first < 0 {
                    return Err(SpectralError::InvalidStride(format!(
                        "first stride must be >= 0 (got {first})"
                    )));
                }
                if min >= max {
                    return Err(SpectralError::InvalidStride(format!(
                        "random stride requires min < max (got {min}..{max})"
                    )));
                }
                if matches!(self, StrideConfig::IncrementalRandom { .. }) && min <= 0 {
                    return Err(SpectralError::InvalidStride(format!(
                        "incremental random stride requires min > 0 (got {min})"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Instantiate the policy for images spanning `samples_per_fingerprint` samples.
    pub fn build(&self, samples_per_fingerprint: usize) -> Stride {
        let rng = match *self {
            StrideConfig::Random { seed, .. } | StrideConfig::IncrementalRandom { seed, .. } => {
                Some(match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_rng(&mut rand::rng()),
                })
            }
            _ => None,
        };
        Stride {
            cfg: self.clone(),
            samples_per_fingerprint: samples_per_fingerprint as i64,
            rng,
        }
    }

    /// Whether the policy draws random strides.
    pub fn is_random(&self) -> bool {
        matches!(
            self,
            StrideConfig::Random { .. } | StrideConfig::IncrementalRandom { .. }
        )
    }
}

/// Runtime stride generator.
#[derive(Debug)]
pub struct Stride {
    cfg: StrideConfig,
    samples_per_fingerprint: i64,
    rng: Option<StdRng>,
}

impl Stride {
    /// Offset of the first image in samples.
    pub fn first_stride(&self) -> i64 {
        match self.cfg {
            StrideConfig::Static { first, .. }
            | StrideConfig::Random { first, .. }
            | StrideConfig::IncrementalStatic { first, .. }
            | StrideConfig::IncrementalRandom { first, .. } => first,
        }
    }

    /// Gap in samples between the end of the current image and the start of
    /// the next one. Negative values mean overlapping images.
    pub fn next_stride(&mut self) -> i64 {
        match self.cfg {
            StrideConfig::Static { stride, .. } => stride,
            StrideConfig::IncrementalStatic { increment, .. } => {
                increment - self.samples_per_fingerprint
            }
            StrideConfig::Random { min, max, .. } => self.draw(min, max),
            StrideConfig::IncrementalRandom { min, max, .. } => {
                self.draw(min, max) - self.samples_per_fingerprint
            }
        }
    }

    fn draw(&mut self, min: i64, max: i64) -> i64 {
        match self.rng.as_mut() {
            Some(rng) => rng.random_range(min..max),
            None => min,
        }
    }
}
