use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::fs;
use std::path::PathBuf;

use super::annotate::{annotate, AnnotationStyle};
use super::{PreviewSettings, Previewer};
use crate::detect::DetectionSet;
use crate::frame::Frame;

/// Writes the annotated frame to a JPEG every `every_n_frames` frames.
///
/// The file is replaced atomically so a viewer polling it never sees a torn image.
pub struct SnapshotPreviewer {
    path: PathBuf,
    every_n_frames: u32,
    quality: u8,
    style: AnnotationStyle,
    frames_seen: u64,
    snapshots_written: u64,
    closed: bool,
}

impl SnapshotPreviewer {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            path: settings.path.clone(),
            every_n_frames: settings.every_n_frames.max(1),
            quality: settings.jpeg_quality.clamp(1, 100),
            style: settings.style.clone(),
            frames_seen: 0,
            snapshots_written: 0,
            closed: false,
        }
    }

    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written
    }

    fn write_snapshot(&self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        let pixels = annotate(frame, detections, &self.style);
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .write_image(&pixels, frame.width, frame.height, ExtendedColorType::Rgb8)
            .context("jpeg encode failed")?;

        let tmp = self.path.with_extension("jpg.tmp");
        fs::write(&tmp, &encoded)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl Previewer for SnapshotPreviewer {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        if self.closed {
            return Err(anyhow!("preview surface closed"));
        }
        self.frames_seen += 1;
        if (self.frames_seen - 1) % u64::from(self.every_n_frames) != 0 {
            return Ok(());
        }
        self.write_snapshot(frame, detections)?;
        self.snapshots_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            log::info!(
                "preview: {} snapshots written to {}",
                self.snapshots_written,
                self.path.display()
            );
        }
        Ok(())
    }
}
