//! # ACFP Perceptual Fingerprinting
//!
//! Converts raw mono samples into a time-ordered sequence of compact binary
//! fingerprints that survive re-encoding, mild noise and small time shifts.
//!
//! ## Contract
//!
//! - Input is a mono `f32` buffer at the configured sample rate; resampling
//!   and decoding happen upstream.
//! - The API performs no I/O and reads no global state. With a static stride
//!   policy the output is bit-identical for the same `(samples, config)`.
//! - Every fingerprint in a [`FingerprintSet`] has exactly
//!   [`FingerprintConfig::fingerprint_bits`] bits.
//!
//! ## Core Pipeline
//!
//! 1.  **Spectrogram**: windowed FFT compressed into logarithmic bins
//!     (see the `spectral` crate).
//! 2.  **Framing**: the spectrogram is cut into `fingerprint_length`-frame
//!     images according to a stride policy.
//! 3.  **Haar decomposition**: each image is transformed column-wise then
//!     row-wise ([`wavelet`]).
//! 4.  **Top-wavelet encoding**: only the sign of the `top_wavelets`
//!     largest-magnitude coefficients is kept, two bits per cell ([`codec`]).
//!
//! Steps 3 and 4 run on the rayon pool when `use_parallel` is set; output
//! order always follows image order.
//!
//! ## Example Usage
//!
//! ```
//! use perceptual::{fingerprint_samples, FingerprintConfig};
//!
//! let cfg = FingerprintConfig::default();
//! let samples: Vec<f32> = (0..5512 * 5)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 5512.0).sin())
//!     .collect();
//!
//! let set = fingerprint_samples(&samples, &cfg).unwrap();
//! assert!(!set.is_empty());
//! assert!(set.fingerprints.iter().all(|fp| fp.bits.len() == 8192));
//! ```

pub mod codec;
pub mod config;
pub mod fingerprint;
pub mod wavelet;

use rayon::prelude::*;
use spectral::{cut_spectral_images, SpectralImage, SpectrogramBuilder, StrideConfig};
use tracing::debug;

pub use crate::codec::{decode_fingerprint, encode_top_wavelets};
pub use crate::config::{FingerprintConfig, PerceptualError};
pub use crate::fingerprint::{
    AudioFingerprint, Fingerprint, FingerprintMeta, FingerprintParams, FingerprintSet,
};
pub use crate::wavelet::{decompose_image, haar_decompose};

/// Current perceptual algorithm version for this crate.
pub const PERCEPTUAL_VERSION: u16 = 1;

/// Human-readable algorithm identifier.
pub const PERCEPTUAL_ALGORITHM: &str = "logspec_haar_topwavelet_v1";

/// Reusable fingerprint pipeline.
///
/// Holds the validated configuration and the planned FFT so repeated calls do
/// not pay for setup.
#[derive(Debug, Clone)]
pub struct FingerprintPipeline {
    cfg: FingerprintConfig,
    spectrogram: SpectrogramBuilder,
}

impl FingerprintPipeline {
    pub fn new(cfg: FingerprintConfig) -> Result<Self, PerceptualError> {
        cfg.validate()?;
        let spectrogram = SpectrogramBuilder::new(&cfg.spectral)?;
        Ok(Self { cfg, spectrogram })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.cfg
    }

    /// Fingerprint `samples` with the configured stride.
    pub fn fingerprint(&self, samples: &[f32]) -> FingerprintSet {
        self.run(samples, &self.cfg.stride)
    }

    /// Fingerprint `samples` with an explicit stride policy.
    pub fn fingerprint_with_stride(
        &self,
        samples: &[f32],
        stride: &StrideConfig,
    ) -> Result<FingerprintSet, PerceptualError> {
        stride.validate()?;
        Ok(self.run(samples, stride))
    }

    fn run(&self, samples: &[f32], stride_cfg: &StrideConfig) -> FingerprintSet {
        let cfg = &self.cfg;
        let meta = self.meta(stride_cfg);

        let spectrogram = self.spectrogram.build(samples);
        if spectrogram.is_empty() {
            debug!(samples = samples.len(), "fingerprint_input_too_short");
            return FingerprintSet {
                fingerprints: Vec::new(),
                meta,
            };
        }

        let mut stride = stride_cfg.build(cfg.samples_per_fingerprint());
        let images = cut_spectral_images(
            &spectrogram,
            &mut stride,
            cfg.fingerprint_length,
            cfg.spectral.hop_size,
        );

        let top = cfg.top_wavelets;
        let fingerprints: Vec<AudioFingerprint> = if cfg.use_parallel {
            images
                .into_par_iter()
                .enumerate()
                .map(|(sequence, image)| encode_image(sequence, image, top))
                .collect()
        } else {
            images
                .into_iter()
                .enumerate()
                .map(|(sequence, image)| encode_image(sequence, image, top))
                .collect()
        };

        debug!(
            samples = samples.len(),
            frames = spectrogram.width(),
            fingerprints = fingerprints.len(),
            "fingerprint_set_built"
        );
        FingerprintSet { fingerprints, meta }
    }

    fn meta(&self, stride: &StrideConfig) -> FingerprintMeta {
        let cfg = &self.cfg;
        FingerprintMeta {
            perceptual_version: PERCEPTUAL_VERSION,
            algorithm_name: PERCEPTUAL_ALGORITHM.to_string(),
            sample_rate: cfg.spectral.sample_rate,
            window_size: cfg.spectral.window_size,
            hop_size: cfg.spectral.hop_size,
            log_bins: cfg.spectral.log_bins,
            fingerprint_length: cfg.fingerprint_length,
            top_wavelets: cfg.top_wavelets,
            fingerprint_bits: cfg.fingerprint_bits(),
            stride: stride.clone(),
            use_parallel: cfg.use_parallel,
            config_version: cfg.version,
        }
    }
}

fn encode_image(sequence: usize, mut image: SpectralImage, top_wavelets: usize) -> AudioFingerprint {
    decompose_image(&mut image);
    AudioFingerprint {
        sequence,
        start_frame: image.start_frame(),
        bits: encode_top_wavelets(&image, top_wavelets),
    }
}

/// Compute the fingerprint set for `samples` using `cfg.stride`.
pub fn fingerprint_samples(
    samples: &[f32],
    cfg: &FingerprintConfig,
) -> Result<FingerprintSet, PerceptualError> {
    Ok(FingerprintPipeline::new(cfg.clone())?.fingerprint(samples))
}

/// Compute the fingerprint set for `samples` with an explicit stride policy.
pub fn fingerprint_samples_with_stride(
    samples: &[f32],
    cfg: &FingerprintConfig,
    stride: &StrideConfig,
) -> Result<FingerprintSet, PerceptualError> {
    FingerprintPipeline::new(cfg.clone())?.fingerprint_with_stride(samples, stride)
}
