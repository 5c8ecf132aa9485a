//! Video frames and frame-to-frame similarity

use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::fmt;

/// Bytes per RGBA pixel
const RGBA_STRIDE: usize = 4;

/// Largest per-pixel difference summed over R, G and B
const MAX_PIXEL_DIFF: f64 = 255.0 * 3.0;

/// A single RGBA8 video frame
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl VideoFrame {
    /// Wrap a tightly packed RGBA8 buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` if either dimension is zero or the buffer length
    /// is not `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize * RGBA_STRIDE;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame where every pixel has the same colour
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            data: rgba.repeat(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes
    pub fn as_rgba(&self) -> &[u8] {
        &self.data
    }

    /// Number of pixels in the frame
    pub fn pixel_count(&self) -> usize {
        self.data.len() / RGBA_STRIDE
    }

    /// Resample the frame to `width` x `height`
    ///
    /// Frames already at the target size are returned as-is.
    pub fn downscale(&self, width: u32, height: u32) -> Result<VideoFrame> {
        if self.width == width && self.height == height {
            return Ok(self.clone());
        }

        let image = RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| Error::InvalidFrame("buffer does not match dimensions".to_string()))?;
        let resized = imageops::resize(&image, width, height, FilterType::Triangle);

        VideoFrame::from_rgba(width, height, resized.into_raw())
    }

    /// Drop the alpha channel, producing packed RGB8
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.pixel_count() * 3);
        for pixel in self.data.chunks_exact(RGBA_STRIDE) {
            rgb.extend_from_slice(&pixel[..3]);
        }
        rgb
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Similarity between two equally sized frames, in [0, 1]
///
/// `1 - sum(|ΔR| + |ΔG| + |ΔB|) / (pixels * 255 * 3)`. Alpha is ignored.
/// Frames of different sizes, or empty frames, score 0.
pub fn similarity(current: &VideoFrame, previous: &VideoFrame) -> f64 {
    if current.width != previous.width || current.height != previous.height {
        return 0.0;
    }

    let pixels = current.pixel_count();
    if pixels == 0 {
        return 0.0;
    }

    let total_diff: u64 = current
        .data
        .chunks_exact(RGBA_STRIDE)
        .zip(previous.data.chunks_exact(RGBA_STRIDE))
        .map(|(a, b)| {
            (0..3)
                .map(|c| u64::from(a[c].abs_diff(b[c])))
                .sum::<u64>()
        })
        .sum();

    1.0 - total_diff as f64 / (pixels as f64 * MAX_PIXEL_DIFF)
}
