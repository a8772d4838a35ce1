//! Synthetic frame source for `stub://` devices.
//!
//! Generates a drifting gradient at the configured resolution. The scene shifts every
//! 50 frames so stub detectors see changing content.
//!
//! `stub://name?drop_every=N` makes every Nth read return `CaptureError::NotReady`,
//! which exercises the pipeline's skip-cycle path without a real device.

use std::time::{Duration, Instant};

use super::{CaptureConfig, CaptureError, CaptureStats, DeviceError, FrameSource};
use crate::frame::{rgb_len, Frame};

pub struct SyntheticSource {
    config: CaptureConfig,
    drop_every: Option<u64>,
    open: bool,
    read_attempts: u64,
    frame_count: u64,
    frames_missed: u64,
    scene_state: u8,
    next_deadline: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: CaptureConfig) -> Result<Self, DeviceError> {
        let drop_every = parse_drop_every(&config.device)?;
        Ok(Self {
            config,
            drop_every,
            open: false,
            read_attempts: 0,
            frame_count: 0,
            frames_missed: 0,
            scene_state: 0,
            next_deadline: None,
        })
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + interval);
    }

    fn generate_pixels(&mut self) -> Result<Vec<u8>, CaptureError> {
        let len = rgb_len(self.config.width, self.config.height)
            .map_err(|e| CaptureError::Read(e.to_string()))?;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; len];
        let shift = self.frame_count + u64::from(self.scene_state) * 17;
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + shift) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.open = true;
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }
        self.pace();
        self.read_attempts += 1;
        if let Some(every) = self.drop_every {
            if self.read_attempts % every == 0 {
                self.frames_missed += 1;
                return Err(CaptureError::NotReady);
            }
        }

        let pixels = self.generate_pixels()?;
        let frame = Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count + 1,
        )
        .map_err(|e| {
            self.frames_missed += 1;
            CaptureError::Read(e.to_string())
        })?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.open {
            self.open = false;
            log::info!("SyntheticSource: closed {}", self.config.device);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{}, synthetic)",
            self.config.device, self.config.width, self.config.height
        )
    }

    fn is_healthy(&self) -> bool {
        self.open
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            frames_missed: self.frames_missed,
            device: self.config.device.clone(),
        }
    }
}

fn parse_drop_every(device: &str) -> Result<Option<u64>, DeviceError> {
    let Some((_, query)) = device.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "drop_every" => {
                let every: u64 = value.parse().map_err(|_| DeviceError::Open {
                    device: device.to_string(),
                    reason: format!("invalid drop_every value '{}'", value),
                })?;
                if every == 0 {
                    return Err(DeviceError::Open {
                        device: device.to_string(),
                        reason: "drop_every must be greater than zero".to_string(),
                    });
                }
                return Ok(Some(every));
            }
            other => {
                return Err(DeviceError::Open {
                    device: device.to_string(),
                    reason: format!("unknown stub option '{}'", other),
                })
            }
        }
    }
    Ok(None)
}
