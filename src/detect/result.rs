use thiserror::Error;

/// Reasons a detection is rejected at construction time.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InvalidDetection {
    #[error("bounding box contains a non-finite coordinate")]
    NonFiniteBox,
    #[error("bounding box is inverted: ({x1}, {y1}) .. ({x2}, {y2})")]
    InvertedBox { x1: f64, y1: f64, x2: f64, y2: f64 },
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("class id {0} is not a valid non-negative id")]
    ClassIdOutOfRange(i64),
    #[error("class name is empty")]
    EmptyClassName,
}

/// One object found in a frame.
///
/// Coordinates are in frame pixel space (`x1 <= x2`, `y1 <= y2`). A detection has no
/// identity of its own; it only means something next to the frame it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    bounding_box: [f64; 4],
    confidence: f64,
    class_id: u32,
    class_name: String,
}

impl Detection {
    pub fn new(
        bounding_box: [f64; 4],
        confidence: f64,
        class_id: u32,
        class_name: impl Into<String>,
    ) -> Result<Self, InvalidDetection> {
        if bounding_box.iter().any(|v| !v.is_finite()) {
            return Err(InvalidDetection::NonFiniteBox);
        }
        let [x1, y1, x2, y2] = bounding_box;
        if x1 > x2 || y1 > y2 {
            return Err(InvalidDetection::InvertedBox { x1, y1, x2, y2 });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(InvalidDetection::ConfidenceOutOfRange(confidence));
        }
        let class_name = class_name.into();
        if class_name.is_empty() {
            return Err(InvalidDetection::EmptyClassName);
        }
        Ok(Self {
            bounding_box,
            confidence,
            class_id,
            class_name,
        })
    }

    /// `[x1, y1, x2, y2]` in frame pixels.
    pub fn bounding_box(&self) -> [f64; 4] {
        self.bounding_box
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn width(&self) -> f64 {
        self.bounding_box[2] - self.bounding_box[0]
    }

    pub fn height(&self) -> f64 {
        self.bounding_box[3] - self.bounding_box[1]
    }
}

/// Ordered detections from one inference call on one frame.
///
/// The order is whatever the detector produced and is never re-sorted downstream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self {
            detections: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_degenerate_box() {
        let d = Detection::new([5.0, 5.0, 5.0, 5.0], 0.0, 0, "dot").unwrap();
        assert_eq!(d.width(), 0.0);
        assert_eq!(d.height(), 0.0);
    }

    #[test]
    fn rejects_malformed_detections() {
        assert_eq!(
            Detection::new([10.0, 0.0, 5.0, 1.0], 0.5, 1, "x"),
            Err(InvalidDetection::InvertedBox {
                x1: 10.0,
                y1: 0.0,
                x2: 5.0,
                y2: 1.0
            })
        );
        assert_eq!(
            Detection::new([0.0, 0.0, 1.0, 1.0], 1.5, 1, "x"),
            Err(InvalidDetection::ConfidenceOutOfRange(1.5))
        );
        assert_eq!(
            Detection::new([0.0, f64::NAN, 1.0, 1.0], 0.5, 1, "x"),
            Err(InvalidDetection::NonFiniteBox)
        );
        assert_eq!(
            Detection::new([0.0, 0.0, 1.0, 1.0], 0.5, 1, ""),
            Err(InvalidDetection::EmptyClassName)
        );
        assert!(Detection::new([0.0, 0.0, 1.0, 1.0], f64::NAN, 1, "x").is_err());
    }

    #[test]
    fn detection_set_preserves_insertion_order() {
        let names = ["c", "a", "b"];
        let set: DetectionSet = names
            .iter()
            .enumerate()
            .map(|(i, name)| Detection::new([0.0, 0.0, 1.0, 1.0], 0.5, i as u32, *name).unwrap())
            .collect();

        let observed: Vec<&str> = set.iter().map(|d| d.class_name()).collect();
        assert_eq!(observed, names);
        assert_eq!(set.len(), 3);
    }
}
