pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use std::path::Path;

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectorBackend, InferenceError};

/// Build the backend named in the detector settings.
///
/// Model loading happens here, so every error is a startup (model-load) failure.
pub fn load_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>, InferenceError> {
    let labels = match &settings.labels_path {
        Some(path) => load_labels(path)?,
        None => Vec::new(),
    };
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::with_labels(labels))),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let backend = TractBackend::new(&settings.model_path, settings.input_size)?
                .with_threshold(settings.confidence_threshold)
                .with_labels(labels);
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(InferenceError::ModelLoad {
            path: settings.model_path.clone(),
            reason: "the tract backend requires the backend-tract feature".to_string(),
        }),
        other => Err(InferenceError::UnknownBackend(other.to_string())),
    }
}

/// Read one class name per line. Blank lines keep their slot so ids stay aligned.
pub fn load_labels(path: &Path) -> Result<Vec<String>, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ModelLoad {
        path: path.display().to_string(),
        reason: format!("failed to read labels: {}", e),
    })?;
    Ok(raw.lines().map(|line| line.trim().to_string()).collect())
}
