//! Frame type and pixel conversion: YUYV/GREY to RGB, dark detection, PNG encoding.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// A captured camera frame in packed RGB8.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame from packed RGB8 data, checking the buffer length.
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let pixels = self.data.len() / 3;
        let sum: u64 = self.data.chunks_exact(3).map(|p| luma(p) as u64).sum();
        sum as f32 / pixels as f32
    }

    /// True if nearly every pixel is black (lens covered, sensor still settling).
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, 0.95)
    }

    /// Encode the frame losslessly as PNG at native resolution.
    pub fn to_png(&self) -> Result<Vec<u8>, FrameError> {
        let expected = rgb_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        let mut out = Vec::with_capacity(expected / 2);
        PngEncoder::new(&mut out)
            .write_image(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out)
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Integer BT.601 luma of one RGB pixel.
fn luma(rgb: &[u8]) -> u8 {
    ((rgb[0] as u32 * 77 + rgb[1] as u32 * 150 + rgb[2] as u32 * 29) >> 8) as u8
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]. Both pixels share the
/// chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = y as i32 - 16;
            rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB8.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Check if an RGB8 buffer is dark.
///
/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgb.chunks_exact(3).filter(|p| luma(p) < 32).count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("png encoding failed: {0}")]
    Encode(String),
}
