use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectorBackend, InferenceError};
use crate::detect::result::{Detection, DetectionSet};
use crate::frame::Frame;

/// Labels used when no label list is configured.
pub const DEFAULT_STUB_LABELS: &[&str] = &[
    "ace_of_spades",
    "king_of_clubs",
    "queen_of_hearts",
    "jack_of_diamonds",
    "ten_of_hearts",
];

/// Most detections the stub reports for a single frame.
const MAX_STUB_DETECTIONS: usize = 3;

/// Stub backend for testing and `stub` deployments.
///
/// Derives zero to three detections from a SHA-256 of the pixels, so identical
/// frames always yield identical detection sets.
pub struct StubBackend {
    labels: Vec<String>,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_labels(DEFAULT_STUB_LABELS.iter().map(|l| l.to_string()).collect())
    }

    /// Use a custom label list. An empty list falls back to the defaults.
    pub fn with_labels(labels: Vec<String>) -> Self {
        let labels = if labels.is_empty() {
            DEFAULT_STUB_LABELS.iter().map(|l| l.to_string()).collect()
        } else {
            labels
        };
        Self {
            labels,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionSet, InferenceError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(InferenceError::Input("frame has zero area".to_string()));
        }
        self.frames_seen += 1;

        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = digest[0] as usize % (MAX_STUB_DETECTIONS + 1);
        let width = frame.width as f64;
        let height = frame.height as f64;

        let mut set = DetectionSet::new();
        for i in 0..count {
            let chunk = &digest[1 + i * 6..1 + (i + 1) * 6];
            let x1 = width * (chunk[0] as f64 / 255.0) * 0.5;
            let y1 = height * (chunk[1] as f64 / 255.0) * 0.5;
            let x2 = (x1 + width * (0.1 + chunk[2] as f64 / 510.0)).min(width);
            let y2 = (y1 + height * (0.1 + chunk[3] as f64 / 510.0)).min(height);
            let confidence = chunk[4] as f64 / 255.0;
            let class_id = chunk[5] as usize % self.labels.len();
            // Blank lines in a labels file keep their slot but have no name.
            let class_name = match self.labels[class_id].as_str() {
                "" => format!("class_{}", class_id),
                name => name.to_string(),
            };
            set.push(Detection::new(
                [x1.round(), y1.round(), x2.round(), y2.round()],
                confidence,
                class_id as u32,
                class_name,
            )?);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(fill: u8) -> Frame {
        Frame::from_rgb(vec![fill; 64 * 48 * 3], 64, 48, 0).unwrap()
    }

    #[test]
    fn stub_backend_is_deterministic() {
        let mut backend = StubBackend::new();
        let a = backend.infer(&frame_with(7)).unwrap();
        let b = backend.infer(&frame_with(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.frames_seen(), 2);
    }

    #[test]
    fn stub_detections_stay_inside_frame() {
        let mut backend = StubBackend::new();
        for fill in 0..=255u8 {
            let set = backend.infer(&frame_with(fill)).unwrap();
            assert!(set.len() <= MAX_STUB_DETECTIONS);
            for d in &set {
                let [x1, y1, x2, y2] = d.bounding_box();
                assert!(x1 >= 0.0 && y1 >= 0.0);
                assert!(x2 <= 64.0 && y2 <= 48.0);
                assert!(DEFAULT_STUB_LABELS.contains(&d.class_name()));
            }
        }
    }

    #[test]
    fn custom_labels_are_used() {
        let mut backend = StubBackend::with_labels(vec!["card".to_string()]);
        for fill in 0..32u8 {
            for d in &backend.infer(&frame_with(fill)).unwrap() {
                assert_eq!(d.class_name(), "card");
                assert_eq!(d.class_id(), 0);
            }
        }
    }
}
