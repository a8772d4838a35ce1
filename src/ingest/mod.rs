//! Frame capture sources.
//!
//! - Synthetic generator for `stub://` devices (always available)
//! - USB/V4L2 devices such as `/dev/video0` (feature: ingest-v4l2)
//!
//! Every source produces RGB24 `Frame`s at the configured resolution. Sources own
//! their device handle outright: `open` acquires it, `close` releases it, and `close`
//! is safe to call any number of times.
//!
//! A source MUST NOT block forever in `next_frame`. When nothing is available yet
//! it returns `CaptureError::NotReady`, which the pipeline treats as a skipped cycle.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use serde::Deserialize;
use thiserror::Error;

use crate::frame::Frame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_DEVICE: &str = "stub://camera0";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Fatal capture-device failures (open/close).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unsupported capture device '{0}'")]
    Unsupported(String),
    #[error("failed to open capture device {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("failed to release capture device {device}: {reason}")]
    Close { device: String, reason: String },
}

/// Per-frame capture failures. All of these are transient to the pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no frame ready yet")]
    NotReady,
    #[error("capture device is not open")]
    NotOpen,
    #[error("frame read failed: {0}")]
    Read(String),
}

/// Capture configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path (`/dev/video0`) or `stub://name[?drop_every=N]`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Synthetic sources pace themselves to it; 0 disables pacing.
    pub target_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

/// Pull-based frame source contract.
pub trait FrameSource: Send {
    /// Acquire the device at the configured resolution.
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Pull the next frame.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the device. Idempotent.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Whether the device is open and delivering frames.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Capture counters for health reporting.
    fn stats(&self) -> CaptureStats {
        CaptureStats {
            device: self.describe(),
            ..CaptureStats::default()
        }
    }
}

/// Statistics for a capture source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_missed: u64,
    pub device: String,
}

/// Capture source selected from the configured device string.
pub struct CaptureSource {
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Source),
}

impl CaptureSource {
    pub fn new(config: CaptureConfig) -> Result<Self, DeviceError> {
        if config.width == 0 || config.height == 0 {
            return Err(DeviceError::Open {
                device: config.device,
                reason: "capture resolution must be non-zero".to_string(),
            });
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CaptureBackend::Synthetic(SyntheticSource::new(config)?),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CaptureBackend::Device(V4l2Source::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(DeviceError::Unsupported(format!(
                "{} (device capture requires the ingest-v4l2 feature)",
                config.device
            )))
        }
    }
}

impl FrameSource for CaptureSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.next_frame(),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.close(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.describe(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> CaptureStats {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_devices_select_synthetic_source() {
        let mut source = CaptureSource::new(CaptureConfig {
            device: "stub://test".to_string(),
            target_fps: 0,
            ..CaptureConfig::default()
        })
        .unwrap();
        source.open().unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(source.stats().frames_captured, 1);
        source.close().unwrap();
    }

    #[test]
    fn boxed_source_reports_backend_stats() {
        let mut source: Box<dyn FrameSource> = Box::new(
            CaptureSource::new(CaptureConfig {
                device: "stub://test?drop_every=3".to_string(),
                width: 8,
                height: 8,
                target_fps: 0,
            })
            .unwrap(),
        );
        assert!(!source.is_healthy());
        source.open().unwrap();
        for _ in 0..6 {
            let _ = source.next_frame();
        }

        assert!(source.is_healthy());
        let stats = source.stats();
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.frames_missed, 2);
        assert_eq!(stats.device, "stub://test?drop_every=3");
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let result = CaptureSource::new(CaptureConfig {
            width: 0,
            ..CaptureConfig::default()
        });
        assert!(matches!(result, Err(DeviceError::Open { .. })));
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_paths_need_v4l2_feature() {
        let result = CaptureSource::new(CaptureConfig {
            device: "/dev/video0".to_string(),
            ..CaptureConfig::default()
        });
        assert!(matches!(result, Err(DeviceError::Unsupported(_))));
    }
}
