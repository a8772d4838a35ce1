use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::CaptureConfig;
use crate::pipeline::PipelineSettings;
use crate::preview::PreviewSettings;
use crate::transport::{ConnectOptions, Endpoint};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 4040;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "train8/weights/best.onnx";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StreamerConfigFile {
    capture: Option<CaptureConfig>,
    endpoint: Option<EndpointSettings>,
    detector: Option<DetectorSettings>,
    preview: Option<PreviewSettings>,
    pipeline: Option<PipelineSettings>,
}

/// Remote consumer address and socket limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Upper bound on a blocked send. 0 blocks indefinitely.
    pub write_timeout_ms: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl EndpointSettings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: (self.write_timeout_ms > 0)
                .then(|| Duration::from_millis(self.write_timeout_ms)),
        }
    }
}

/// Detector selection. `model_path` is opaque to everything but the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: String,
    pub labels_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: DEFAULT_MODEL_PATH.to_string(),
            labels_path: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamerConfig {
    pub capture: CaptureConfig,
    pub endpoint: EndpointSettings,
    pub detector: DetectorSettings,
    pub preview: PreviewSettings,
    pub pipeline: PipelineSettings,
}

impl StreamerConfig {
    /// Load from `$STREAMER_CONFIG` (optional JSON file), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("STREAMER_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => StreamerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Self {
        Self {
            capture: file.capture.unwrap_or_default(),
            endpoint: file.endpoint.unwrap_or_default(),
            detector: file.detector.unwrap_or_default(),
            preview: file.preview.unwrap_or_default(),
            pipeline: file.pipeline.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("STREAMER_SOURCE") {
            self.capture.device = device;
        }
        if let Some(width) = non_empty_env("STREAMER_WIDTH") {
            self.capture.width = width
                .parse()
                .map_err(|_| anyhow!("STREAMER_WIDTH must be a positive integer"))?;
        }
        if let Some(height) = non_empty_env("STREAMER_HEIGHT") {
            self.capture.height = height
                .parse()
                .map_err(|_| anyhow!("STREAMER_HEIGHT must be a positive integer"))?;
        }
        if let Some(host) = non_empty_env("STREAMER_HOST") {
            self.endpoint.host = host;
        }
        if let Some(port) = non_empty_env("STREAMER_PORT") {
            self.endpoint.port = port
                .parse()
                .map_err(|_| anyhow!("STREAMER_PORT must be a TCP port number"))?;
        }
        if let Some(model) = non_empty_env("STREAMER_MODEL") {
            self.detector.model_path = model;
        }
        if let Some(backend) = non_empty_env("STREAMER_BACKEND") {
            self.detector.backend = backend;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!(
                "capture resolution must be non-zero (got {}x{})",
                self.capture.width,
                self.capture.height
            ));
        }
        if self.capture.device.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.endpoint.host.trim().is_empty() {
            return Err(anyhow!("endpoint host must not be empty"));
        }
        if self.endpoint.port == 0 {
            return Err(anyhow!("endpoint port must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!(
                "detector confidence_threshold must be within [0, 1] (got {})",
                self.detector.confidence_threshold
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        self.preview.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
