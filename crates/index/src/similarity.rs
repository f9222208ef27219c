//! Exact distances between two fingerprints, used for re-ranking.

use perceptual::Fingerprint;

const EVEN_BITS: u64 = 0x5555_5555_5555_5555;

/// Number of differing bit positions.
///
/// Fingerprints of different lengths are compared over the longer one, with
/// the missing tail treated as zero.
pub fn hamming_distance(a: &Fingerprint, b: &Fingerprint) -> u32 {
    let (long, short) = if a.words().len() >= b.words().len() {
        (a.words(), b.words())
    } else {
        (b.words(), a.words())
    };
    let shared: u32 = long
        .iter()
        .zip(short)
        .map(|(x, y)| (x ^ y).count_ones())
        .sum();
    let tail: u32 = long[short.len()..].iter().map(|w| w.count_ones()).sum();
    shared + tail
}

/// Jaccard similarity of the set-bit positions: `|a & b| / |a | b|`.
///
/// Two silent fingerprints have nothing in common and score 0.
pub fn jaccard_similarity(a: &Fingerprint, b: &Fingerprint) -> f32 {
    let (mut inter, mut union) = (0u32, 0u32);
    for i in 0..a.words().len().max(b.words().len()) {
        let x = a.words().get(i).copied().unwrap_or(0);
        let y = b.words().get(i).copied().unwrap_or(0);
        inter += (x & y).count_ones();
        union += (x | y).count_ones();
    }
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

/// Cosine similarity of the decoded `{+1, 0, -1}` sign vectors.
///
/// Computed on the packed form: a cell contributes `+1` when both sides set
/// the same bit of the pair and `-1` when they set opposite bits.
pub fn cosine_similarity(a: &Fingerprint, b: &Fingerprint) -> f32 {
    let (mut same, mut opposite) = (0i64, 0i64);
    for (x, y) in a.words().iter().zip(b.words()) {
        same += i64::from((x & y).count_ones());
        opposite += i64::from((x & swap_pairs(*y)).count_ones());
    }
    let norm = (a.count_ones() as f64 * b.count_ones() as f64).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        ((same - opposite) as f64 / norm) as f32
    }
}

#[inline]
fn swap_pairs(word: u64) -> u64 {
    ((word & EVEN_BITS) << 1) | ((word >> 1) & EVEN_BITS)
}
