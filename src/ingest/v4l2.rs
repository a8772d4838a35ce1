//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. `/dev/video0`) through libv4l memory-mapped
//! streaming. The device is asked for RGB3 at the configured resolution; YUYV and NV12
//! are converted to RGB24 in-memory when the driver refuses RGB3.
//!
//! Reads are bounded by a poll timeout so `next_frame` never blocks forever: a timed
//! out dequeue surfaces as `CaptureError::NotReady`.

use ouroboros::self_referencing;
use std::io;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureConfig, CaptureError, CaptureStats, DeviceError, FrameSource};
use crate::frame::Frame;

/// Upper bound for a single dequeue.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct V4l2Source {
    config: CaptureConfig,
    state: Option<V4l2State>,
    format: PixelFormat,
    frame_count: u64,
    frames_missed: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            frames_missed: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    /// Wrap converted pixels into the next sequenced frame.
    ///
    /// Counters only advance once the frame exists, so a rejected buffer is a miss.
    fn finish_frame(&mut self, pixels: Vec<u8>) -> Result<Frame, CaptureError> {
        let frame = match Frame::from_rgb(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count + 1,
        ) {
            Ok(frame) => frame,
            Err(err) => {
                self.frames_missed += 1;
                self.last_error = Some(err.to_string());
                return Err(CaptureError::Read(err.to_string()));
            }
        };
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(frame)
    }

    fn open_error(&self, reason: impl std::fmt::Display) -> DeviceError {
        DeviceError::Open {
            device: self.config.device.clone(),
            reason: reason.to_string(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<(), DeviceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        if self.state.is_some() {
            return Ok(());
        }

        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| self.open_error(format!("open device: {}", e)))?;
        let mut format = device
            .format()
            .map_err(|e| self.open_error(format!("read format: {}", e)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| self.open_error(format!("read format after set failure: {}", e)))?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            self.open_error(format!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(&format.fourcc.repr)
            ))
        })?;

        if format.width != self.config.width || format.height != self.config.height {
            log::warn!(
                "V4l2Source: {} negotiated {}x{} instead of {}x{}",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)?;
                stream.set_timeout(READ_TIMEOUT);
                Ok::<_, io::Error>(stream)
            },
        }
        .try_build()
        .map_err(|e| self.open_error(format!("create buffer stream: {}", e)))?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "V4l2Source: opened {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let width = self.active_width;
        let height = self.active_height;
        let format = self.format;
        let state = self.state.as_mut().ok_or(CaptureError::NotOpen)?;

        let result = state.with_mut(|fields| -> Result<Vec<u8>, CaptureError> {
            let (buf, meta) = match fields.stream.next() {
                Ok(next) => next,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(CaptureError::NotReady)
                }
                Err(err) => return Err(CaptureError::Read(format!("dequeue frame: {}", err))),
            };
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used == 0 { buf } else { &buf[..used] };
            normalize_to_rgb(data, width, height, format)
        });

        let pixels = match result {
            Ok(pixels) => pixels,
            Err(err) => {
                self.frames_missed += 1;
                if !matches!(err, CaptureError::NotReady) {
                    self.last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };

        self.finish_frame(pixels)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{}, v4l2)",
            self.config.device, self.active_width, self.active_height
        )
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            frames_missed: self.frames_missed,
            device: self.config.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_open_fails() {
        let mut source = V4l2Source::new(CaptureConfig {
            device: "/dev/video-does-not-exist".to_string(),
            ..CaptureConfig::default()
        });
        assert!(matches!(source.next_frame(), Err(CaptureError::NotOpen)));
        assert!(!source.is_healthy());
    }

    #[test]
    fn rejected_buffer_does_not_advance_sequence() {
        let mut source = V4l2Source::new(CaptureConfig {
            device: "/dev/video-does-not-exist".to_string(),
            width: 4,
            height: 2,
            target_fps: 0,
        });

        assert!(matches!(
            source.finish_frame(vec![0u8; 5]),
            Err(CaptureError::Read(_))
        ));
        let stats = source.stats();
        assert_eq!(stats.frames_captured, 0);
        assert_eq!(stats.frames_missed, 1);

        let frame = source.finish_frame(vec![0u8; 4 * 2 * 3]).unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut source = V4l2Source::new(CaptureConfig {
            device: "/dev/video-does-not-exist".to_string(),
            ..CaptureConfig::default()
        });
        assert!(matches!(source.open(), Err(DeviceError::Open { .. })));
        source.close().unwrap();
    }
}
