//! Audio source contract and a WAV implementation.
//!
//! The fingerprinting core only ever sees mono `f32` samples at the
//! configured sample rate; decoding, downmixing and resampling happen here.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to decode WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("failed to seek in audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported sample rate {0} Hz")]
    InvalidSampleRate(u32),

    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u16),
}

/// Reads a mono sample buffer from some audio container.
pub trait AudioSource: Send + Sync {
    /// Read `duration_ms` of audio (to the end when `None`) starting at
    /// `start_ms`, downmixed to mono and resampled to `sample_rate`.
    fn read_mono_samples(
        &self,
        path: &Path,
        sample_rate: u32,
        duration_ms: Option<u64>,
        start_ms: u64,
    ) -> Result<Vec<f32>, AudioError>;
}

/// [`AudioSource`] for PCM and float WAV files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavAudioSource;

impl WavAudioSource {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSource for WavAudioSource {
    fn read_mono_samples(
        &self,
        path: &Path,
        sample_rate: u32,
        duration_ms: Option<u64>,
        start_ms: u64,
    ) -> Result<Vec<f32>, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(sample_rate));
        }
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(AudioError::UnsupportedChannels(spec.channels));
        }
        if spec.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(spec.sample_rate));
        }

        let total_frames = u64::from(reader.duration());
        let start = (start_ms * u64::from(spec.sample_rate) / 1000).min(total_frames);
        let frames = match duration_ms {
            Some(ms) => (ms * u64::from(spec.sample_rate) / 1000).min(total_frames - start),
            None => total_frames - start,
        };
        reader.seek(start as u32)?;

        let channels = usize::from(spec.channels);
        let interleaved = read_interleaved(&mut reader, frames as usize * channels)?;
        let mono = downmix(&interleaved, channels);
        let samples = resample_linear(&mono, spec.sample_rate, sample_rate);
        debug!(
            path = %path.display(),
            source_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "wav_samples_read"
        );
        Ok(samples)
    }
}

fn read_interleaved(
    reader: &mut WavReader<BufReader<File>>,
    count: usize,
) -> Result<Vec<f32>, AudioError> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .take(count)
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .take(count)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(samples)
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampling from `from` Hz to `to` Hz.
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from) / f64::from(to);
    let out_len = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = (pos - i0 as f64) as f32;
            samples[i0] + (samples[i1] - samples[i0]) * frac
        })
        .collect()
}
