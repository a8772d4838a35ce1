//! Capture → infer → send → preview loop.
//!
//! ```text
//! Starting ──► Running ──► Stopping ──► Stopped
//!    │            │
//!    └────────────┴──────► Faulted
//! ```
//!
//! `Starting` acquires the frame source, the detector and the sink, in that order.
//! Anything acquired before a failure is released again, and `Running` is never
//! entered. Teardown always releases sink, source, then preview surface; each release
//! is attempted once and its failure is only logged.

mod acquire;
mod cancel;
mod runner;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::codec::CodecError;
use crate::detect::InferenceError;
use crate::ingest::DeviceError;
use crate::transport::{ConnectError, SendError};

pub use acquire::{Acquire, LiveCollaborators};
pub use cancel::CancelToken;
pub use runner::Pipeline;

const DEFAULT_CAPTURE_RETRY_MS: u64 = 5;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
            PipelineState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// How cycles are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// One cycle at a time on the calling thread.
    #[default]
    Sequential,
    /// Capture and inference on a worker thread, one cycle ahead of send and preview.
    Staged,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Sequential => f.write_str("sequential"),
            PipelineMode::Staged => f.write_str("staged"),
        }
    }
}

impl std::str::FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(PipelineMode::Sequential),
            "staged" => Ok(PipelineMode::Staged),
            other => Err(anyhow!("unknown pipeline mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub mode: PipelineMode,
    /// Consecutive failed reads before the loop faults. `None` never faults.
    pub max_consecutive_capture_failures: Option<u32>,
    /// Pause after a failed read.
    pub capture_retry_ms: u64,
    /// Health line interval. 0 disables it.
    pub health_log_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Sequential,
            max_consecutive_capture_failures: None,
            capture_retry_ms: DEFAULT_CAPTURE_RETRY_MS,
            health_log_secs: DEFAULT_HEALTH_LOG_SECS,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_capture_failures == Some(0) {
            return Err(anyhow!(
                "pipeline max_consecutive_capture_failures must be greater than zero"
            ));
        }
        Ok(())
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_log_secs > 0).then(|| Duration::from_secs(self.health_log_secs))
    }
}

/// Why a run ended in `Faulted`.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error("capture device unavailable: {0}")]
    Device(#[from] DeviceError),
    #[error("detector unavailable: {0}")]
    Detector(#[source] InferenceError),
    #[error("inference failed: {0}")]
    Inference(#[source] InferenceError),
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("send failed: {0}")]
    Send(#[from] SendError),
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),
    #[error("capture stalled after {0} consecutive failed reads")]
    CaptureStalled(u32),
    #[error("capture worker exited unexpectedly")]
    WorkerLost,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub records_sent: u64,
    pub preview_failures: u64,
}

/// Outcome of `Pipeline::run`.
#[derive(Debug)]
pub struct PipelineReport {
    pub final_state: PipelineState,
    pub fault: Option<PipelineFault>,
    pub stats: PipelineStats,
    pub reached_running: bool,
}

impl PipelineReport {
    /// True for an operator stop; false for any fault.
    pub fn is_success(&self) -> bool {
        self.final_state == PipelineState::Stopped && self.fault.is_none()
    }
}
