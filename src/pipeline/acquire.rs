use crate::config::StreamerConfig;
use crate::detect::{load_backend, DetectorBackend, InferenceError};
use crate::ingest::{CaptureSource, DeviceError, FrameSource};
use crate::transport::{ConnectError, RecordSink, StreamClient};

use super::CancelToken;

/// Acquires the pipeline's owned resources during `Starting`.
///
/// The pipeline calls these in order and stops at the first failure. A returned frame
/// source is already open.
pub trait Acquire {
    fn frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError>;
    fn detector(&mut self) -> Result<Box<dyn DetectorBackend>, InferenceError>;
    fn sink(&mut self) -> Result<Box<dyn RecordSink>, ConnectError>;
}

/// Real devices, detector and TCP connection, built from configuration.
pub struct LiveCollaborators<'a> {
    config: &'a StreamerConfig,
    cancel: CancelToken,
}

impl<'a> LiveCollaborators<'a> {
    /// The connection is attached to `cancel` so a forced stop can interrupt a send.
    pub fn new(config: &'a StreamerConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }
}

impl Acquire for LiveCollaborators<'_> {
    fn frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError> {
        let mut source = CaptureSource::new(self.config.capture.clone())?;
        source.open()?;
        log::info!("capture: opened {}", source.describe());
        Ok(Box::new(source))
    }

    fn detector(&mut self) -> Result<Box<dyn DetectorBackend>, InferenceError> {
        let backend = load_backend(&self.config.detector)?;
        log::info!(
            "detector: {} backend loaded (model {})",
            backend.name(),
            self.config.detector.model_path
        );
        Ok(backend)
    }

    fn sink(&mut self) -> Result<Box<dyn RecordSink>, ConnectError> {
        let client = StreamClient::connect(
            &self.config.endpoint.endpoint(),
            &self.config.endpoint.connect_options(),
        )?;
        match client.closer() {
            Ok(closer) => self.cancel.attach(closer),
            Err(err) => log::warn!("transport: forced stop cannot interrupt sends: {}", err),
        }
        Ok(Box::new(client))
    }
}
