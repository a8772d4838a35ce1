//! Detection streamer
//!
//! Captures frames from a local camera, runs an object detector on each frame, and
//! streams every detection to a remote consumer as one JSON line over a single
//! long-lived TCP connection.
//!
//! # Architecture
//!
//! - `ingest`: frame sources (`stub://` synthetic generator, V4L2 devices)
//! - `detect`: `Detection`/`DetectionSet` and pluggable detector backends
//! - `codec`: the line-delimited JSON wire format
//! - `transport`: the outbound connection and its state machine
//! - `preview`: best-effort annotated preview surfaces
//! - `pipeline`: the capture → infer → send → preview loop and its lifecycle
//! - `config`: JSON file plus environment layered configuration
//!
//! Delivery is at-most-once: there is no acknowledgement, no retry and no reconnect.
//! Any send failure faults the pipeline.

pub mod codec;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preview;
pub mod transport;

pub use codec::{CodecError, WireRecord};
pub use config::StreamerConfig;
pub use detect::{Detection, DetectionSet, DetectorBackend, InferenceError};
pub use frame::Frame;
pub use ingest::{CaptureConfig, CaptureError, CaptureSource, DeviceError, FrameSource};
pub use pipeline::{
    Acquire, CancelToken, LiveCollaborators, Pipeline, PipelineFault, PipelineMode,
    PipelineReport, PipelineState,
};
pub use preview::{build_previewer, Previewer};
pub use transport::{ConnectError, ConnectionState, Endpoint, RecordSink, SendError, StreamClient};
