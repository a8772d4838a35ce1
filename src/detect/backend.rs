use thiserror::Error;

use crate::detect::result::{DetectionSet, InvalidDetection};
use crate::frame::Frame;

/// Detector failures.
///
/// `ModelLoad` only occurs while the pipeline is starting. Everything else is raised
/// from `infer` and is unrecoverable for the running pipeline.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("unknown detector backend '{0}'")]
    UnknownBackend(String),
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("frame rejected by detector: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("detector produced an invalid detection: {0}")]
    Invalid(#[from] InvalidDetection),
}

/// Detector backend trait.
///
/// Backends are black boxes to the pipeline: a frame goes in, an ordered set of
/// detections comes out. Implementations must treat the frame as read-only and must
/// not retain it beyond the `infer` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn infer(&mut self, frame: &Frame) -> Result<DetectionSet, InferenceError>;

    /// Optional warm-up hook, called once before the pipeline enters `Running`.
    fn warm_up(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }
}
