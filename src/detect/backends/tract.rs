#![cfg(feature = "backend-tract")]

use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, InferenceError};
use crate::detect::result::{Detection, DetectionSet};
use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a square `[1, 3, S, S]` float input and a `[1, 4 + C, N]` output where each
/// of the N columns holds `cx, cy, w, h` followed by C class scores. The frame is
/// resampled to the model input and boxes are mapped back into frame pixel space.
/// No network I/O; the only file access is loading the model.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    labels: Vec<String>,
}

#[derive(Clone, Debug)]
struct Candidate {
    bbox: [f32; 4],
    score: f32,
    class_id: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self, InferenceError> {
        let model_path = model_path.as_ref();
        let load_error = |stage: &str, err: TractError| InferenceError::ModelLoad {
            path: model_path.display().to_string(),
            reason: format!("{}: {}", stage, err),
        };
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_error("read", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .map_err(|e| load_error("input fact", e))?
            .into_optimized()
            .map_err(|e| load_error("optimize", e))?
            .into_runnable()
            .map_err(|e| load_error("build runnable", e))?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            labels: Vec::new(),
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Class names indexed by class id.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .filter(|l| !l.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, InferenceError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(InferenceError::Input("frame has zero area".to_string()));
        }
        let side = self.input_size as usize;
        let fw = frame.width as usize;
        let fh = frame.height as usize;
        let pixels = frame.pixels();

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let sx = (x * fw / side).min(fw - 1);
            let sy = (y * fh / side).min(fh - 1);
            pixels[(sy * fw + sx) * RGB_CHANNELS + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, output: &Tensor, frame: &Frame) -> Result<DetectionSet, InferenceError> {
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Run(format!("model output was not f32: {}", e)))?;
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|e| InferenceError::Run(format!("unexpected output rank: {}", e)))?;
        let (_, rows, anchors) = view.dim();
        if rows <= 4 {
            return Err(InferenceError::Run(format!(
                "model output has {} rows, expected 4 box rows plus class scores",
                rows
            )));
        }
        let num_classes = rows - 4;
        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let max_x = frame.width as f32;
        let max_y = frame.height as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..num_classes {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if !best_score.is_finite() || best_score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(x1, max_x);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(y1, max_y);
            candidates.push(Candidate {
                bbox: [x1, y1, x2, y2],
                score: best_score.clamp(0.0, 1.0),
                class_id: best_class,
            });
        }

        non_max_suppression(candidates, self.iou_threshold)
            .into_iter()
            .map(|c| {
                Detection::new(
                    c.bbox.map(f64::from),
                    c.score as f64,
                    c.class_id as u32,
                    self.label(c.class_id),
                )
                .map_err(InferenceError::from)
            })
            .collect::<Result<DetectionSet, _>>()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionSet, InferenceError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Run(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Run("model produced no outputs".to_string()))?;
        self.decode(output, frame)
    }

    fn warm_up(&mut self) -> Result<(), InferenceError> {
        let side = self.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, side, side])
            .map_err(|e| InferenceError::Run(format!("warm-up tensor: {}", e)))?;
        self.model
            .run(tvec!(blank.into()))
            .map_err(|e| InferenceError::Run(format!("warm-up inference failed: {}", e)))?;
        Ok(())
    }
}

/// Per-class greedy NMS. Output is ordered by descending score.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(bbox: [f32; 4], score: f32, class_id: usize) -> Candidate {
        Candidate {
            bbox,
            score,
            class_id,
        }
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_same_class() {
        let kept = non_max_suppression(
            vec![
                candidate([0.0, 0.0, 10.0, 10.0], 0.6, 0),
                candidate([1.0, 1.0, 10.0, 10.0], 0.9, 0),
                candidate([1.0, 1.0, 10.0, 10.0], 0.8, 1),
                candidate([50.0, 50.0, 60.0, 60.0], 0.5, 0),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.5]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
