//! Slicing a log spectrogram into fixed-size spectral images.

use tracing::debug;

use crate::config::SpectralError;
use crate::spectrogram::Spectrogram;
use crate::stride::Stride;

/// A dense `frames x bins` window cut from a spectrogram, stored row-major
/// (one row per frame).
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralImage {
    frames: usize,
    bins: usize,
    start_frame: usize,
    data: Vec<f32>,
}

impl SpectralImage {
    /// A zero-filled image.
    pub fn zeros(frames: usize, bins: usize, start_frame: usize) -> Self {
        Self {
            frames,
            bins,
            start_frame,
            data: vec![0.0; frames * bins],
        }
    }

    /// Wrap existing row-major data.
    pub fn from_vec(frames: usize, bins: usize, data: Vec<f32>) -> Result<Self, SpectralError> {
        if data.len() != frames * bins {
            return Err(SpectralError::ShapeMismatch {
                what: "spectral image",
                expected: frames * bins,
                actual: data.len(),
            });
        }
        Ok(Self {
            frames,
            bins,
            start_frame: 0,
            data,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Index of the spectrogram frame this image starts at.
    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, frame: usize, bin: usize) -> f32 {
        self.data[frame * self.bins + bin]
    }

    pub fn set(&mut self, frame: usize, bin: usize, value: f32) {
        self.data[frame * self.bins + bin] = value;
    }

    pub fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn row_mut(&mut self, frame: usize) -> &mut [f32] {
        &mut self.data[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Cut `image_length`-frame images out of `spectrogram`.
///
/// Images start at `first_stride / hop` and advance by
/// `image_length + next_stride / hop` frames while a full image still fits
/// strictly inside the spectrogram. A non-empty spectrogram that admits no
/// full image yields exactly one image holding the available frames,
/// zero-padded to `image_length`.
pub fn cut_spectral_images(
    spectrogram: &Spectrogram,
    stride: &mut Stride,
    image_length: usize,
    hop_size: usize,
) -> Vec<SpectralImage> {
    let width = spectrogram.width();
    let bins = spectrogram.bins();
    let mut images = Vec::new();
    if width == 0 || image_length == 0 {
        return images;
    }

    let hop = hop_size.max(1) as i64;
    let length = image_length as i64;
    let mut start = (stride.first_stride() / hop).max(0);
    while start + length < width as i64 {
        images.push(copy_frames(spectrogram, start as usize, image_length));
        let advance = length + stride.next_stride() / hop;
        // A stride that cancels the image length would never terminate.
        start += advance.max(1);
    }

    if images.is_empty() {
        images.push(copy_frames(spectrogram, 0, image_length));
    }

    debug!(
        width,
        bins,
        image_length,
        images = images.len(),
        "spectral_images_cut"
    );
    images
}

fn copy_frames(spectrogram: &Spectrogram, start: usize, image_length: usize) -> SpectralImage {
    let bins = spectrogram.bins();
    let mut image = SpectralImage::zeros(image_length, bins, start);
    let end = (start + image_length).min(spectrogram.width());
    for (row, frame) in (start..end).enumerate() {
        image.row_mut(row).copy_from_slice(spectrogram.frame(frame));
    }
    image
}
