mod backend;
pub mod backends;
mod result;

pub use backend::{DetectorBackend, InferenceError};
pub use backends::{load_backend, StubBackend};
pub use result::{Detection, DetectionSet, InvalidDetection};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
