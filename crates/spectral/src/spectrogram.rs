//! Windowed FFT and logarithmic frequency compression.
//!
//! A [`SpectrogramBuilder`] is constructed once per configuration. It
//! precomputes the window coefficients, the FFT plan and the log-bin edges so
//! that [`SpectrogramBuilder::build`] only does per-frame work.

use std::borrow::Cow;
use std::sync::Arc;

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::config::{LogBase, SpectralConfig, SpectralError};

/// Lower clamp for the scaled RMS used by loudness normalization.
pub const MIN_RMS: f64 = 0.1;
/// Upper clamp for the scaled RMS used by loudness normalization.
pub const MAX_RMS: f64 = 3.0;

/// Log-frequency magnitude spectrogram stored frame-major.
///
/// Width is the number of frames (time), height the number of log bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    bins: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    /// An empty spectrogram with the given bin count.
    pub fn empty(bins: usize) -> Self {
        Self {
            bins,
            data: Vec::new(),
        }
    }

    /// Build from explicit frames. Every frame must have the same length.
    pub fn from_frames(frames: &[Vec<f32>]) -> Result<Self, SpectralError> {
        let bins = frames.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(frames.len() * bins);
        for frame in frames {
            if frame.len() != bins {
                return Err(SpectralError::ShapeMismatch {
                    what: "spectrogram frame",
                    expected: bins,
                    actual: frame.len(),
                });
            }
            data.extend_from_slice(frame);
        }
        Ok(Self { bins, data })
    }

    /// Number of frames.
    pub fn width(&self) -> usize {
        if self.bins == 0 {
            0
        } else {
            self.data.len() / self.bins
        }
    }

    /// Number of log bins per frame.
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Magnitudes of frame `index`.
    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.bins..(index + 1) * self.bins]
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.bins.max(1))
    }
}

/// Scale the buffer so its RMS (x10) lands in `[MIN_RMS, MAX_RMS]`, then clip to `[-1, 1]`.
pub fn normalize_in_place(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = ((squares / samples.len() as f64).sqrt() * 10.0).clamp(MIN_RMS, MAX_RMS);
    for sample in samples.iter_mut() {
        *sample = ((f64::from(*sample) / rms) as f32).clamp(-1.0, 1.0);
    }
}

/// Map a frequency to an FFT index for a spectrum of `fft_size` points.
fn frequency_to_index(frequency: f64, sample_rate: u32, fft_size: usize) -> usize {
    let fraction = frequency / (f64::from(sample_rate) / 2.0);
    ((fft_size / 2 + 1) as f64 * fraction).round().max(0.0) as usize
}

/// Compute the `log_bins + 1` FFT index edges for the configured range.
pub fn log_frequency_edges(cfg: &SpectralConfig) -> Vec<usize> {
    let bins = cfg.log_bins;
    let limit = cfg.window_size / 2;
    let mut edges = Vec::with_capacity(bins + 1);
    match cfg.log_base {
        LogBase::Fixed { base } => {
            let log_min = cfg.min_frequency.ln() / base.ln();
            let log_max = cfg.max_frequency.ln() / base.ln();
            let delta = (log_max - log_min) / bins as f64;
            for i in 0..=bins {
                let frequency = base.powf(log_min + delta * i as f64);
                edges.push(frequency_to_index(frequency, cfg.sample_rate, cfg.window_size).min(limit));
            }
        }
        LogBase::Dynamic => {
            let base = ((cfg.max_frequency / cfg.min_frequency).ln() / bins as f64).exp();
            let min_coef =
                cfg.window_size as f64 / f64::from(cfg.sample_rate) * cfg.min_frequency;
            for j in 0..=bins {
                let start = ((base.powi(j as i32) - 1.0) * min_coef) as usize;
                edges.push((start + min_coef as usize).min(limit));
            }
        }
    }
    edges
}

/// Produces log-frequency spectrograms from mono sample buffers.
#[derive(Clone)]
pub struct SpectrogramBuilder {
    cfg: SpectralConfig,
    window: Vec<f32>,
    edges: Vec<usize>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectrogramBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramBuilder")
            .field("cfg", &self.cfg)
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

impl SpectrogramBuilder {
    pub fn new(cfg: &SpectralConfig) -> Result<Self, SpectralError> {
        cfg.validate()?;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(cfg.window_size);
        Ok(Self {
            cfg: cfg.clone(),
            window: cfg.window.coefficients(cfg.window_size),
            edges: log_frequency_edges(cfg),
            fft,
        })
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.cfg
    }

    /// FFT index edges of the log bins.
    pub fn edges(&self) -> &[usize] {
        &self.edges
    }

    /// Number of frames produced for `sample_count` samples.
    pub fn frame_count(&self, sample_count: usize) -> usize {
        if sample_count < self.cfg.window_size {
            0
        } else {
            (sample_count - self.cfg.window_size) / self.cfg.hop_size
        }
    }

    /// Build the log spectrogram. Buffers shorter than one window yield an
    /// empty spectrogram.
    pub fn build(&self, samples: &[f32]) -> Spectrogram {
        let bins = self.cfg.log_bins;
        let width = self.frame_count(samples.len());
        if width == 0 {
            debug!(samples = samples.len(), "spectrogram_too_short");
            return Spectrogram::empty(bins);
        }

        let signal: Cow<'_, [f32]> = if self.cfg.normalize {
            let mut owned = samples.to_vec();
            normalize_in_place(&mut owned);
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(samples)
        };

        let mut data = vec![0.0f32; width * bins];
        let scratch_len = self.fft.get_inplace_scratch_len();
        let init = || {
            (
                vec![Complex::new(0.0f32, 0.0); self.cfg.window_size],
                vec![Complex::new(0.0f32, 0.0); scratch_len],
            )
        };

        if self.cfg.use_parallel {
            data.par_chunks_mut(bins)
                .enumerate()
                .for_each_init(init, |(buffer, scratch), (index, out)| {
                    self.analyze_frame(&signal, index, buffer, scratch, out);
                });
        } else {
            let (mut buffer, mut scratch) = init();
            for (index, out) in data.chunks_mut(bins).enumerate() {
                self.analyze_frame(&signal, index, &mut buffer, &mut scratch, out);
            }
        }

        debug!(
            samples = samples.len(),
            frames = width,
            bins,
            "spectrogram_built"
        );
        Spectrogram { bins, data }
    }

    fn analyze_frame(
        &self,
        signal: &[f32],
        index: usize,
        buffer: &mut [Complex<f32>],
        scratch: &mut [Complex<f32>],
        out: &mut [f32],
    ) {
        let start = index * self.cfg.hop_size;
        let frame = &signal[start..start + self.cfg.window_size];
        for ((slot, &sample), &w) in buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(buffer, scratch);

        for (bin, value) in out.iter_mut().enumerate() {
            let low = self.edges[bin];
            let high = self.edges[bin + 1];
            *value = if high > low {
                let sum: f32 = buffer[low..high].iter().map(|c| c.norm()).sum();
                sum / (high - low) as f32
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frequency: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn ragged_frames_are_rejected() {
        let ok = Spectrogram::from_frames(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(ok.width(), 2);
        assert!(matches!(
            Spectrogram::from_frames(&[vec![1.0, 2.0], vec![3.0]]),
            Err(SpectralError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn frame_count_follows_window_and_hop() {
        let builder = SpectrogramBuilder::new(&SpectralConfig::default()).unwrap();
        assert_eq!(builder.frame_count(100), 0);
        assert_eq!(builder.frame_count(2048), 0);
        assert_eq!(builder.frame_count(2048 + 64 * 10), 10);
        assert_eq!(builder.frame_count(2048 + 64 * 10 + 63), 10);
    }

    #[test]
    fn short_buffer_yields_empty_spectrogram() {
        let builder = SpectrogramBuilder::new(&SpectralConfig::default()).unwrap();
        let spec = builder.build(&[0.5; 1000]);
        assert!(spec.is_empty());
        assert_eq!(spec.width(), 0);
        assert_eq!(spec.bins(), 32);
    }

    #[test]
    fn edges_are_monotonic_and_cover_range() {
        for base in [LogBase::Fixed { base: 2.0 }, LogBase::Dynamic] {
            let cfg = SpectralConfig::default().with_log_base(base);
            let edges = log_frequency_edges(&cfg);
            assert_eq!(edges.len(), 33);
            assert!(edges.windows(2).all(|w| w[0] <= w[1]), "{base:?}");
            // 318 Hz maps near index 118 of a 2048-point FFT at 5512 Hz.
            assert!((115..=121).contains(&edges[0]), "{base:?}: {}", edges[0]);
            assert!((740..=746).contains(&edges[32]), "{base:?}: {}", edges[32]);
        }
    }

    #[test]
    fn fixed_base_value_does_not_change_edges() {
        let two = log_frequency_edges(&SpectralConfig::default());
        let ten = log_frequency_edges(
            &SpectralConfig::default().with_log_base(LogBase::Fixed { base: 10.0 }),
        );
        assert_eq!(two, ten);
    }

    #[test]
    fn tone_energy_lands_in_expected_bin() {
        let cfg = SpectralConfig::default();
        let builder = SpectrogramBuilder::new(&cfg).unwrap();
        let spec = builder.build(&tone(440.0, cfg.sample_rate, 2.0));
        assert!(spec.width() > 0);

        let edges = builder.edges();
        let tone_index = frequency_to_index(440.0, cfg.sample_rate, cfg.window_size);
        let expected_bin = edges
            .windows(2)
            .position(|w| w[0] <= tone_index && tone_index < w[1])
            .unwrap();

        let frame = spec.frame(spec.width() / 2);
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(loudest.abs_diff(expected_bin) <= 1);
        assert!(frame.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn parallel_matches_sequential() {
        let samples = tone(700.0, 5512, 3.0);
        let seq = SpectrogramBuilder::new(&SpectralConfig::default()).unwrap();
        let par = SpectrogramBuilder::new(&SpectralConfig::default().with_parallel(true)).unwrap();
        assert_eq!(seq.build(&samples), par.build(&samples));
    }

    #[test]
    fn normalization_clamps_to_unit_range() {
        let mut loud: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 40.0 } else { -40.0 }).collect();
        normalize_in_place(&mut loud);
        assert!(loud.iter().all(|s| (-1.0..=1.0).contains(s)));

        let mut quiet = vec![0.001f32; 100];
        normalize_in_place(&mut quiet);
        // RMS*10 = 0.01 is clamped up to MIN_RMS, so samples scale by 10.
        assert!((quiet[0] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn silence_produces_zero_magnitudes() {
        let builder = SpectrogramBuilder::new(&SpectralConfig::default()).unwrap();
        let spec = builder.build(&vec![0.0; 8000]);
        assert!(spec.width() > 0);
        assert!(spec.frames().all(|f| f.iter().all(|v| *v == 0.0)));
    }
}
