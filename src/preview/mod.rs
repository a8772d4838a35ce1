//! Best-effort preview surfaces.
//!
//! A previewer sees every frame the pipeline completes, after its detections have been
//! sent. Failures here are logged by the pipeline and never change its state.

pub mod annotate;
mod font;
#[cfg(feature = "preview-jpeg")]
mod snapshot;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::detect::DetectionSet;
use crate::frame::Frame;

pub use annotate::{AnnotationStyle, LabelPosition};
#[cfg(feature = "preview-jpeg")]
pub use snapshot::SnapshotPreviewer;

const DEFAULT_PREVIEW_BACKEND: &str = "log";
const DEFAULT_SNAPSHOT_PATH: &str = "preview.jpg";
const DEFAULT_JPEG_QUALITY: u8 = 80;

pub trait Previewer {
    fn name(&self) -> &'static str;

    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()>;

    /// Release the surface. Idempotent.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// `log`, `none` or `jpeg`.
    pub backend: String,
    /// Snapshot target for the `jpeg` backend.
    pub path: PathBuf,
    pub every_n_frames: u32,
    pub jpeg_quality: u8,
    pub style: AnnotationStyle,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_PREVIEW_BACKEND.to_string(),
            path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            every_n_frames: 1,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            style: AnnotationStyle::default(),
        }
    }
}

impl PreviewSettings {
    pub fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "log" | "none" | "jpeg" => {}
            other => return Err(anyhow!("unknown preview backend '{}'", other)),
        }
        if self.every_n_frames == 0 {
            return Err(anyhow!("preview every_n_frames must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "preview jpeg_quality must be within [1, 100] (got {})",
                self.jpeg_quality
            ));
        }
        if self.style.box_thickness == 0 {
            return Err(anyhow!("preview box_thickness must be greater than zero"));
        }
        if self.style.label_scale == 0 {
            return Err(anyhow!("preview label_scale must be greater than zero"));
        }
        Ok(())
    }
}

pub fn build_previewer(settings: &PreviewSettings) -> Result<Box<dyn Previewer>> {
    match settings.backend.as_str() {
        "log" => Ok(Box::new(LogPreviewer::new(settings.every_n_frames))),
        "none" => Ok(Box::new(NullPreviewer)),
        #[cfg(feature = "preview-jpeg")]
        "jpeg" => Ok(Box::new(SnapshotPreviewer::new(settings))),
        #[cfg(not(feature = "preview-jpeg"))]
        "jpeg" => Err(anyhow!(
            "preview backend 'jpeg' requires the preview-jpeg feature"
        )),
        other => Err(anyhow!("unknown preview backend '{}'", other)),
    }
}

/// Logs a one-line summary of each rendered frame at debug level.
pub struct LogPreviewer {
    every_n_frames: u32,
    frames_rendered: u64,
    closed: bool,
}

impl LogPreviewer {
    pub fn new(every_n_frames: u32) -> Self {
        Self {
            every_n_frames: every_n_frames.max(1),
            frames_rendered: 0,
            closed: false,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

impl Previewer for LogPreviewer {
    fn name(&self) -> &'static str {
        "log"
    }

    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        if self.closed {
            return Err(anyhow!("preview surface closed"));
        }
        self.frames_rendered += 1;
        if self.frames_rendered % u64::from(self.every_n_frames) != 0 {
            return Ok(());
        }
        let names: Vec<&str> = detections.iter().map(|d| d.class_name()).collect();
        log::debug!(
            "preview: frame {} {}x{} age={:?} detections=[{}]",
            frame.sequence,
            frame.width,
            frame.height,
            frame.age(),
            names.join(", ")
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            log::info!("preview: closed after {} frames", self.frames_rendered);
        }
        Ok(())
    }
}

pub struct NullPreviewer;

impl Previewer for NullPreviewer {
    fn name(&self) -> &'static str {
        "none"
    }

    fn render(&mut self, _frame: &Frame, _detections: &DetectionSet) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
