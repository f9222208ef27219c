//! Fingerprint and metadata types for the ACFP perceptual layer.
//!
//! The fingerprint schema and metadata are part of the public contract: any
//! incompatible change must result in a new `perceptual_version`.

use serde::{Deserialize, Serialize};
use spectral::{StrideConfig, WindowFunction};

use crate::config::PerceptualError;

/// Fixed-length bit-vector produced from one spectral image.
///
/// Bits `2i` and `2i + 1` encode the sign of image cell `i`: `10` positive,
/// `01` negative, `00` not among the top wavelets. `11` never occurs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PackedBits", into = "PackedBits")]
pub struct Fingerprint {
    len: usize,
    words: Vec<u64>,
}

impl Fingerprint {
    /// An all-zero fingerprint of `len` bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut fp = Self::zeros(bits.len());
        for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
            fp.set(i, true);
        }
        fp
    }

    /// Rebuild a fingerprint from its packed byte form (see [`Self::to_bytes`]).
    ///
    /// Stray bits past `len` in the last byte are cleared.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Result<Self, PerceptualError> {
        let expected = len.div_ceil(8);
        if bytes.len() != expected {
            return Err(PerceptualError::InvalidFingerprintBytes {
                bits: len,
                expected,
                actual: bytes.len(),
            });
        }
        let mut words: Vec<u64> = bytes
            .chunks(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf[..chunk.len()].copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect();
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        Ok(Self { len, words })
    }

    /// Pack bits least-significant first: bit `i` lives in byte `i / 8` at
    /// position `i % 8`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.truncate(self.len.div_ceil(8));
        bytes
    }

    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.get(i)).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Backing words, least-significant bit first. Bits past `len` are zero.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// A fingerprint with no set bit carries no content.
    pub fn is_silent(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Indices of set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(wi * 64 + bit)
            })
        })
    }
}

#[derive(Serialize, Deserialize)]
struct PackedBits {
    len: usize,
    bytes: Vec<u8>,
}

impl From<Fingerprint> for PackedBits {
    fn from(fp: Fingerprint) -> Self {
        Self {
            bytes: fp.to_bytes(),
            len: fp.len,
        }
    }
}

impl TryFrom<PackedBits> for Fingerprint {
    type Error = PerceptualError;

    fn try_from(packed: PackedBits) -> Result<Self, Self::Error> {
        Fingerprint::from_bytes(&packed.bytes, packed.len)
    }
}

/// One fingerprint together with its position in the source audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFingerprint {
    /// Zero-based index of the image this fingerprint came from.
    pub sequence: usize,
    /// First spectrogram frame covered by the image.
    pub start_frame: usize,
    pub bits: Fingerprint,
}

impl AudioFingerprint {
    /// Offset of the image start in seconds.
    pub fn start_seconds(&self, hop_size: usize, sample_rate: u32) -> f64 {
        (self.start_frame * hop_size) as f64 / f64::from(sample_rate)
    }
}

/// Output of the fingerprint pipeline for one audio buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintSet {
    /// Fingerprints in time order.
    pub fingerprints: Vec<AudioFingerprint>,
    pub meta: FingerprintMeta,
}

impl FingerprintSet {
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Fingerprints that carry at least one set bit.
    pub fn non_silent(&self) -> impl Iterator<Item = &AudioFingerprint> {
        self.fingerprints.iter().filter(|fp| !fp.bits.is_silent())
    }
}

/// Metadata for traceability and determinism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintMeta {
    /// Perceptual algorithm version.
    ///
    /// Bumped whenever the wavelet transform or sign encoding changes in a
    /// way that can affect fingerprint bits.
    pub perceptual_version: u16,
    pub algorithm_name: String,
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
    pub log_bins: usize,
    pub fingerprint_length: usize,
    pub top_wavelets: usize,
    /// Length of each fingerprint in bits.
    pub fingerprint_bits: usize,
    /// Stride policy the images were cut with.
    pub stride: StrideConfig,
    pub use_parallel: bool,
    /// Configuration schema version supplied by the caller.
    pub config_version: u32,
}

/// Every setting that decides the bits of a fingerprint for a given image
/// position. Stride and parallelism are not part of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintParams {
    pub perceptual_version: u16,
    pub config_version: u32,
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub log_bins: usize,
    /// `Some(base)` for fixed log spacing, `None` for dynamic.
    pub log_base: Option<f64>,
    pub window: WindowFunction,
    pub normalize: bool,
    pub fingerprint_length: usize,
    pub top_wavelets: usize,
}

impl FingerprintParams {
    /// `(field, value)` pairs in a fixed order.
    pub fn named_values(&self) -> Vec<(&'static str, String)> {
        let log_base = match self.log_base {
            Some(base) => format!("fixed({base})"),
            None => "dynamic".to_string(),
        };
        vec![
            ("perceptual_version", self.perceptual_version.to_string()),
            ("config_version", self.config_version.to_string()),
            ("sample_rate", self.sample_rate.to_string()),
            ("window_size", self.window_size.to_string()),
            ("hop_size", self.hop_size.to_string()),
            ("min_frequency", self.min_frequency.to_string()),
            ("max_frequency", self.max_frequency.to_string()),
            ("log_bins", self.log_bins.to_string()),
            ("log_base", log_base),
            ("window", format!("{:?}", self.window).to_lowercase()),
            ("normalize", self.normalize.to_string()),
            ("fingerprint_length", self.fingerprint_length.to_string()),
            ("top_wavelets", self.top_wavelets.to_string()),
        ]
    }
}
