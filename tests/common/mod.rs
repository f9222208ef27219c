//! Signal generators shared by the integration tests.

#![allow(dead_code)]

use std::f32::consts::PI;

use acfp::{AcfpConfig, RetrievalService};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SAMPLE_RATE: f32 = 5512.0;

pub fn service() -> RetrievalService {
    RetrievalService::open_index(&AcfpConfig::default()).expect("in-memory service opens")
}

pub fn tone(freq: f32, seconds: f32) -> Vec<f32> {
    let n = (SAMPLE_RATE * seconds) as usize;
    (0..n)
        .map(|i| (2.0 * PI * freq * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

/// Tone whose amplitude swings by `depth` at `rate` Hz.
pub fn tremolo(freq: f32, rate: f32, depth: f32, seconds: f32) -> Vec<f32> {
    tone(freq, seconds)
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let t = i as f32 / SAMPLE_RATE;
            s * (1.0 + depth * (2.0 * PI * rate * t).sin())
        })
        .collect()
}

/// Uniform white noise in [-1, 1).
pub fn noise(seed: u64, seconds: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = (SAMPLE_RATE * seconds) as usize;
    (0..n).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// Drop the first `ms` milliseconds.
pub fn shifted(samples: &[f32], ms: f32) -> Vec<f32> {
    let skip = (SAMPLE_RATE * ms / 1000.0) as usize;
    samples[skip.min(samples.len())..].to_vec()
}
