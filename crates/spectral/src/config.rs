//! Configuration and error types for the ACFP spectral front-end.
//!
//! Everything that influences the shape or values of a spectrogram lives in
//! [`SpectralConfig`]. Two configs that compare equal produce bit-identical
//! spectrograms for the same samples.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Window applied to every analysis frame before the FFT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Rectangular,
}

impl WindowFunction {
    /// Window coefficients for a frame of `len` samples.
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        if len < 2 {
            return vec![1.0; len];
        }
        let denom = (len - 1) as f64;
        (0..len)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * n as f64 / denom;
                let w = match self {
                    WindowFunction::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Rectangular => 1.0,
                };
                w as f32
            })
            .collect()
    }
}

/// How logarithmic bin edges are spaced between the min and max frequency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogBase {
    /// Edges at `base^(log_b(min) + i * delta)`, mapped to FFT indices by rounding.
    Fixed { base: f64 },
    /// Base derived from the `max/min` ratio so that the edges are evenly
    /// log-spaced; indices are truncated rather than rounded.
    Dynamic,
}

impl Default for LogBase {
    fn default() -> Self {
        LogBase::Fixed { base: 2.0 }
    }
}

/// Spectral analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectralConfig {
    /// Sample rate of the incoming mono buffer in Hz.
    pub sample_rate: u32,
    /// FFT window size in samples.
    pub window_size: usize,
    /// Distance between consecutive analysis frames in samples.
    pub hop_size: usize,
    /// Lower edge of the logarithmic frequency range in Hz.
    pub min_frequency: f64,
    /// Upper edge of the logarithmic frequency range in Hz.
    pub max_frequency: f64,
    /// Number of logarithmic bins per frame.
    pub log_bins: usize,
    /// Edge spacing policy.
    #[serde(default)]
    pub log_base: LogBase,
    /// Analysis window.
    #[serde(default)]
    pub window: WindowFunction,
    /// RMS-normalize the signal before analysis.
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Compute FFT frames on the rayon pool.
    #[serde(default)]
    pub use_parallel: bool,
}

fn default_true() -> bool {
    true
}

impl SpectralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    pub fn with_frequency_range(mut self, min_frequency: f64, max_frequency: f64) -> Self {
        self.min_frequency = min_frequency;
        self.max_frequency = max_frequency;
        self
    }

    pub fn with_log_bins(mut self, log_bins: usize) -> Self {
        self.log_bins = log_bins;
        self
    }

    pub fn with_log_base(mut self, log_base: LogBase) -> Self {
        self.log_base = log_base;
        self
    }

    pub fn with_window(mut self, window: WindowFunction) -> Self {
        self.window = window;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), SpectralError> {
        if self.sample_rate == 0 {
            return Err(SpectralError::InvalidConfig(
                "sample_rate must be > 0".into(),
            ));
        }
        if self.window_size < 2 {
            return Err(SpectralError::InvalidConfig(format!(
                "window_size must be >= 2 (got {})",
                self.window_size
            )));
        }
        if self.hop_size == 0 {
            return Err(SpectralError::InvalidConfig("hop_size must be > 0".into()));
        }
        if self.log_bins == 0 {
            return Err(SpectralError::InvalidConfig("log_bins must be > 0".into()));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return Err(SpectralError::InvalidFrequencyRange {
                min: self.min_frequency,
                max: self.max_frequency,
            });
        }
        let nyquist = f64::from(self.sample_rate) / 2.0;
        if self.max_frequency > nyquist {
            return Err(SpectralError::AboveNyquist {
                max: self.max_frequency,
                nyquist,
            });
        }
        if let LogBase::Fixed { base } = self.log_base {
            if !(base > 1.0) {
                return Err(SpectralError::InvalidConfig(format!(
                    "log base must be > 1.0 (got {base})"
                )));
            }
        }
        Ok(())
    }
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 5512,
            window_size: 2048,
            hop_size: 64,
            min_frequency: 318.0,
            max_frequency: 2000.0,
            log_bins: 32,
            log_base: LogBase::default(),
            window: WindowFunction::default(),
            normalize: true,
            use_parallel: false,
        }
    }
}

/// Errors returned by the spectral front-end.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectralError {
    #[error("invalid spectral config: {0}")]
    InvalidConfig(String),

    #[error("invalid frequency range: min={min} max={max}")]
    InvalidFrequencyRange { min: f64, max: f64 },

    #[error("max frequency {max} Hz exceeds the Nyquist frequency {nyquist} Hz")]
    AboveNyquist { max: f64, nyquist: f64 },

    #[error("invalid stride: {0}")]
    InvalidStride(String),

    #[error("{what} holds {actual} values, shape needs {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_parameters() {
        let cfg = SpectralConfig::default();
        assert_eq!(cfg.sample_rate, 5512);
        assert_eq!(cfg.window_size, 2048);
        assert_eq!(cfg.hop_size, 64);
        assert_eq!(cfg.log_bins, 32);
        assert_eq!(cfg.min_frequency, 318.0);
        assert_eq!(cfg.max_frequency, 2000.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_frequency_range() {
        let cfg = SpectralConfig::new().with_frequency_range(2000.0, 318.0);
        assert!(matches!(
            cfg.validate(),
            Err(SpectralError::InvalidFrequencyRange { .. })
        ));
    }

    #[test]
    fn rejects_range_above_nyquist() {
        let cfg = SpectralConfig::new().with_frequency_range(318.0, 4000.0);
        assert!(matches!(
            cfg.validate(),
            Err(SpectralError::AboveNyquist { .. })
        ));
    }

    #[test]
    fn rejects_zero_hop() {
        let cfg = SpectralConfig::new().with_hop_size(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hann_window_is_symmetric_and_zero_at_edges() {
        let w = WindowFunction::Hann.coefficients(16);
        assert!(w[0].abs() < 1e-6);
        assert!(w[15].abs() < 1e-6);
        for i in 0..8 {
            assert!((w[i] - w[15 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn serde_roundtrip_keeps_log_base() {
        let cfg = SpectralConfig::new().with_log_base(LogBase::Dynamic);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SpectralConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
