//! Captured frames.
//!
//! A `Frame` is one RGB24 sample pulled from a capture source. The pipeline owns it
//! for exactly one cycle; detectors, the codec and previewers only borrow it.
//!
//! - Pixel bytes are private and read-only once captured.
//! - Width and height are fixed at capture time and always match the byte length.
//! - Frames are not `Clone`. A previewer that wants to draw copies the pixels.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant, SystemTime};

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Immutable RGB24 frame.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-source sequence number. Only advances when a frame is actually produced.
    pub sequence: u64,

    /// Wall-clock capture time.
    pub captured_at: SystemTime,

    /// Monotonic capture instant (for latency logging).
    capture_instant: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must be exactly `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        })
    }

    /// Read-only pixel access, row-major RGB24.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Time elapsed since capture.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }

    /// RGB triple at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content stays out of debug output.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Expected RGB24 byte length for the given dimensions.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
