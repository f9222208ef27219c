//! Standard Haar wavelet decomposition of spectral images.

use std::f32::consts::SQRT_2;

use spectral::SpectralImage;

/// In-place 1-D Haar decomposition.
///
/// The input is first scaled by `1 / sqrt(len)`, then repeatedly split into
/// pairwise averages and differences (each divided by `sqrt(2)`) until a
/// single approximation coefficient remains. Power-of-two lengths give the
/// standard transform; for other lengths the trailing odd element of each
/// level is carried through unchanged.
pub fn haar_decompose(values: &mut [f32], scratch: &mut Vec<f32>) {
    let len = values.len();
    if len == 0 {
        return;
    }
    let norm = (len as f32).sqrt();
    for v in values.iter_mut() {
        *v /= norm;
    }

    scratch.clear();
    scratch.resize(len, 0.0);
    let mut h = len;
    while h > 1 {
        h /= 2;
        for i in 0..h {
            let a = values[2 * i];
            let b = values[2 * i + 1];
            scratch[i] = (a + b) / SQRT_2;
            scratch[h + i] = (a - b) / SQRT_2;
        }
        values[..2 * h].copy_from_slice(&scratch[..2 * h]);
    }
}

/// 2-D decomposition: every column (time axis) first, then every row
/// (frequency axis).
pub fn decompose_image(image: &mut SpectralImage) {
    let frames = image.frames();
    let bins = image.bins();
    let mut scratch = Vec::with_capacity(frames.max(bins));
    let mut column = vec![0.0f32; frames];

    for bin in 0..bins {
        for (frame, slot) in column.iter_mut().enumerate() {
            *slot = image.get(frame, bin);
        }
        haar_decompose(&mut column, &mut scratch);
        for (frame, value) in column.iter().enumerate() {
            image.set(frame, bin, *value);
        }
    }

    for frame in 0..frames {
        haar_decompose(image.row_mut(frame), &mut scratch);
    }
}
