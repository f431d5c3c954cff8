//! Frame type and pixel conversion — YUYV/GREY/Y16 to grayscale, dark detection.

use crate::camera::PixelFormat;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Width / height, or 16:9 when either dimension is unknown.
    pub fn aspect_ratio(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            16.0 / 9.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Convert a raw capture buffer to 8-bit grayscale.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;

    match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(FrameError::InvalidLength {
                    format,
                    expected: pixels,
                    actual: buf.len(),
                });
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Y16 => y16_to_grayscale(buf, width, height),
        PixelFormat::Yuyv => yuyv_to_grayscale(buf, width, height),
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: PixelFormat::Yuyv,
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits (keep the high byte).
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format: PixelFormat::Y16,
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected]
        .chunks_exact(2)
        .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
        .collect())
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}
