//! Top-wavelet sign encoding.

use std::cmp::Ordering;

use spectral::SpectralImage;

use crate::config::PerceptualError;
use crate::fingerprint::Fingerprint;

/// Keep the sign of the `top_wavelets` largest-magnitude coefficients.
///
/// Cell `i` among the top set maps to bit `2i` when positive and `2i + 1`
/// when negative; zero-valued coefficients leave both bits clear. Ties in
/// magnitude are broken by cell index, so the selection is deterministic.
pub fn encode_top_wavelets(image: &SpectralImage, top_wavelets: usize) -> Fingerprint {
    let coefficients = image.as_slice();
    let mut fingerprint = Fingerprint::zeros(2 * coefficients.len());
    let top = top_wavelets.min(coefficients.len());
    if top == 0 {
        return fingerprint;
    }

    let by_magnitude = |a: &usize, b: &usize| -> Ordering {
        coefficients[*b]
            .abs()
            .total_cmp(&coefficients[*a].abs())
            .then(a.cmp(b))
    };
    let mut order: Vec<usize> = (0..coefficients.len()).collect();
    order.select_nth_unstable_by(top - 1, by_magnitude);

    for &cell in &order[..top] {
        let value = coefficients[cell];
        if value > 0.0 {
            fingerprint.set(2 * cell, true);
        } else if value < 0.0 {
            fingerprint.set(2 * cell + 1, true);
        }
    }
    fingerprint
}

/// Recover the per-cell sign pattern: `1`, `-1` or `0`.
pub fn decode_fingerprint(fingerprint: &Fingerprint) -> Result<Vec<i8>, PerceptualError> {
    (0..fingerprint.len() / 2)
        .map(|cell| match (fingerprint.get(2 * cell), fingerprint.get(2 * cell + 1)) {
            (true, true) => Err(PerceptualError::InvalidBitPair { cell }),
            (true, false) => Ok(1),
            (false, true) => Ok(-1),
            (false, false) => Ok(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(values: &[f32]) -> SpectralImage {
        SpectralImage::from_vec(1, values.len(), values.to_vec()).unwrap()
    }

    #[test]
    fn keeps_signs_of_largest_coefficients() {
        let fp = encode_top_wavelets(&image(&[0.1, -5.0, 3.0, -0.2]), 2);
        assert_eq!(fp.len(), 8);
        assert_eq!(fp.ones().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(decode_fingerprint(&fp).unwrap(), vec![0, -1, 1, 0]);
    }

    #[test]
    fn never_sets_more_than_top_wavelets_bits() {
        let values: Vec<f32> = (0..64).map(|i| (i as f32 * 1.3).sin()).collect();
        let fp = encode_top_wavelets(&image(&values), 10);
        assert_eq!(fp.count_ones(), 10);
        for cell in 0..64 {
            assert!(!(fp.get(2 * cell) && fp.get(2 * cell + 1)));
        }
    }

    #[test]
    fn zero_coefficients_set_no_bits() {
        let fp = encode_top_wavelets(&image(&[0.0; 16]), 8);
        assert!(fp.is_silent());
    }

    #[test]
    fn magnitude_ties_prefer_lower_index() {
        let fp = encode_top_wavelets(&image(&[1.0, -1.0, 1.0, 1.0]), 2);
        assert_eq!(decode_fingerprint(&fp).unwrap(), vec![1, -1, 0, 0]);
    }

    #[test]
    fn top_larger_than_image_encodes_everything() {
        let fp = encode_top_wavelets(&image(&[1.0, -2.0]), 10);
        assert_eq!(decode_fingerprint(&fp).unwrap(), vec![1, -1]);
    }

    #[test]
    fn decode_rejects_both_bits_set() {
        let fp = Fingerprint::from_bools(&[false, false, true, true]);
        assert_eq!(
            decode_fingerprint(&fp),
            Err(PerceptualError::InvalidBitPair { cell: 1 })
        );
    }
}
