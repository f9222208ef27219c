//! # ACFP Spectral Front-End
//!
//! Turns mono audio samples into the fixed-size time/frequency images that
//! the perceptual layer fingerprints.
//!
//! ## Pipeline
//!
//! 1.  **Normalization** (optional): the buffer is RMS-scaled and clipped so
//!     loud and quiet recordings produce comparable spectra.
//! 2.  **Windowed FFT**: every `hop_size` samples a `window_size` slice is
//!     windowed and transformed with a complex FFT.
//! 3.  **Log-frequency compression**: the magnitude spectrum between
//!     `min_frequency` and `max_frequency` is averaged into `log_bins`
//!     logarithmically spaced bins.
//! 4.  **Slicing**: the spectrogram is cut into `image_length`-frame images
//!     according to a [`Stride`] policy.
//!
//! Buffers shorter than one analysis window are not an error: they produce an
//! empty [`Spectrogram`] and no images.
//!
//! ## Example Usage
//!
//! ```
//! use spectral::{cut_spectral_images, SpectralConfig, SpectrogramBuilder, StrideConfig};
//!
//! let cfg = SpectralConfig::default();
//! let builder = SpectrogramBuilder::new(&cfg).unwrap();
//!
//! let samples: Vec<f32> = (0..cfg.sample_rate as usize * 5)
//!     .map(|i| (i as f32 * 0.5).sin())
//!     .collect();
//! let spectrogram = builder.build(&samples);
//!
//! let mut stride = StrideConfig::insertion_default().build(128 * cfg.hop_size);
//! let images = cut_spectral_images(&spectrogram, &mut stride, 128, cfg.hop_size);
//! assert!(!images.is_empty());
//! assert_eq!(images[0].bins(), 32);
//! ```

pub mod config;
pub mod frames;
pub mod spectrogram;
pub mod stride;

pub use crate::config::{LogBase, SpectralConfig, SpectralError, WindowFunction};
pub use crate::frames::{cut_spectral_images, SpectralImage};
pub use crate::spectrogram::{
    log_frequency_edges, normalize_in_place, Spectrogram, SpectrogramBuilder,
};
pub use crate::stride::{Stride, StrideConfig};
