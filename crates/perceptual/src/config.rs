//! Configuration and error types for ACFP perceptual fingerprinting.
//!
//! This module defines the public configuration surface for the perceptual
//! layer. It is free of any I/O so that the fingerprint pipeline is a pure
//! function of `(samples, config)` for static stride policies.

use serde::{Deserialize, Serialize};
use spectral::{LogBase, SpectralConfig, SpectralError, StrideConfig};
use thiserror::Error;

use crate::fingerprint::FingerprintParams;
use crate::PERCEPTUAL_VERSION;

/// Configuration for the fingerprint pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintConfig {
    /// Configuration schema version.
    ///
    /// Any algorithmic change that can affect fingerprint bits must bump this
    /// version, so that stored fingerprints remain comparable.
    pub version: u32,
    /// Spectral front-end parameters.
    pub spectral: SpectralConfig,
    /// Number of spectrogram frames per spectral image.
    pub fingerprint_length: usize,
    /// Number of wavelet coefficients whose sign survives encoding.
    pub top_wavelets: usize,
    /// Stride used when no explicit policy is passed to the pipeline.
    pub stride: StrideConfig,
    /// Decompose and encode images on the rayon pool.
    pub use_parallel: bool,
}

impl FingerprintConfig {
    /// Create a new configuration with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spectral(mut self, spectral: SpectralConfig) -> Self {
        self.spectral = spectral;
        self
    }

    /// Set the image length in frames. Powers of two decompose cleanly.
    pub fn with_fingerprint_length(mut self, fingerprint_length: usize) -> Self {
        self.fingerprint_length = fingerprint_length;
        self
    }

    /// Set how many top coefficients are encoded. Typical values: 100-400.
    pub fn with_top_wavelets(mut self, top_wavelets: usize) -> Self {
        self.top_wavelets = top_wavelets;
        self
    }

    pub fn with_stride(mut self, stride: StrideConfig) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    /// Length of every fingerprint bit-vector: two bits per image cell.
    pub fn fingerprint_bits(&self) -> usize {
        2 * self.fingerprint_length * self.spectral.log_bins
    }

    /// Number of samples spanned by one spectral image.
    pub fn samples_per_fingerprint(&self) -> usize {
        self.fingerprint_length * self.spectral.hop_size
    }

    /// The subset of this configuration that decides fingerprint bits.
    pub fn params(&self) -> FingerprintParams {
        let spectral = &self.spectral;
        FingerprintParams {
            perceptual_version: PERCEPTUAL_VERSION,
            config_version: self.version,
            sample_rate: spectral.sample_rate,
            window_size: spectral.window_size,
            hop_size: spectral.hop_size,
            min_frequency: spectral.min_frequency,
            max_frequency: spectral.max_frequency,
            log_bins: spectral.log_bins,
            log_base: match spectral.log_base {
                LogBase::Fixed { base } => Some(base),
                LogBase::Dynamic => None,
            },
            window: spectral.window,
            normalize: spectral.normalize,
            fingerprint_length: self.fingerprint_length,
            top_wavelets: self.top_wavelets,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), PerceptualError> {
        if self.version < 1 {
            return Err(PerceptualError::InvalidConfigVersion {
                version: self.version,
            });
        }
        self.spectral.validate()?;
        self.stride.validate()?;
        if self.fingerprint_length == 0 {
            return Err(PerceptualError::InvalidConfig(
                "fingerprint_length must be >= 1".into(),
            ));
        }
        let cells = self.fingerprint_length * self.spectral.log_bins;
        if self.top_wavelets == 0 || self.top_wavelets > cells {
            return Err(PerceptualError::InvalidConfig(format!(
                "top_wavelets must be in 1..={cells} (got {})",
                self.top_wavelets
            )));
        }
        Ok(())
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            version: 1,
            spectral: SpectralConfig::default(),
            fingerprint_length: 128,
            top_wavelets: 200,
            stride: StrideConfig::insertion_default(),
            use_parallel: false,
        }
    }
}

/// Errors returned by the perceptual fingerprinting pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PerceptualError {
    #[error("invalid config version {version}; expected >= 1")]
    InvalidConfigVersion { version: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("spectral error: {0}")]
    Spectral(#[from] SpectralError),

    #[error("fingerprint of {bits} bits needs {expected} bytes, got {actual}")]
    InvalidFingerprintBytes {
        bits: usize,
        expected: usize,
        actual: usize,
    },

    #[error("fingerprint cell {cell} has both sign bits set")]
    InvalidBitPair { cell: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let cfg = FingerprintConfig::default();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.fingerprint_length, 128);
        assert_eq!(cfg.top_wavelets, 200);
        assert_eq!(cfg.fingerprint_bits(), 8192);
        assert_eq!(cfg.samples_per_fingerprint(), 8192);
        assert!(!cfg.use_parallel);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_builder_chain() {
        let cfg = FingerprintConfig::new()
            .with_fingerprint_length(64)
            .with_top_wavelets(100)
            .with_stride(StrideConfig::query_default())
            .with_parallel(true);

        assert_eq!(cfg.fingerprint_length, 64);
        assert_eq!(cfg.top_wavelets, 100);
        assert_eq!(cfg.fingerprint_bits(), 2 * 64 * 32);
        assert!(cfg.stride.is_random());
        assert!(cfg.use_parallel);
    }

    #[test]
    fn config_validate_invalid_version_zero() {
        let cfg = FingerprintConfig {
            version: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PerceptualError::InvalidConfigVersion { version: 0 })
        ));
    }

    #[test]
    fn config_validate_rejects_too_many_wavelets() {
        let cfg = FingerprintConfig::new()
            .with_fingerprint_length(4)
            .with_top_wavelets(4 * 32 + 1);
        assert!(matches!(
            cfg.validate(),
            Err(PerceptualError::InvalidConfig(msg)) if msg.contains("top_wavelets")
        ));
    }

    #[test]
    fn config_validate_propagates_spectral_errors() {
        let cfg = FingerprintConfig::new()
            .with_spectral(SpectralConfig::new().with_log_bins(0));
        assert!(matches!(cfg.validate(), Err(PerceptualError::Spectral(_))));
    }

    #[test]
    fn params_ignore_stride_and_parallelism() {
        let base = FingerprintConfig::new();
        let query = base
            .clone()
            .with_stride(StrideConfig::query_default())
            .with_parallel(true);
        assert_eq!(base.params(), query.params());

        let fewer = base.clone().with_top_wavelets(20);
        assert_ne!(base.params(), fewer.params());
        let changed: Vec<_> = base
            .params()
            .named_values()
            .into_iter()
            .zip(fewer.params().named_values())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a.0)
            .collect();
        assert_eq!(changed, vec!["top_wavelets"]);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = FingerprintConfig::new().with_top_wavelets(150);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FingerprintConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
