//! detection_streamer - Stream per-frame object detections to a TCP consumer.
//!
//! Exits 0 after an operator stop (Ctrl-C) and non-zero when the pipeline faults,
//! including when the consumer cannot be reached at startup.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use detection_streamer::config::StreamerConfig;
use detection_streamer::pipeline::{CancelToken, LiveCollaborators, Pipeline, PipelineMode};
use detection_streamer::preview::build_previewer;
use detection_streamer::transport::Endpoint;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture frames, detect objects and stream detections as JSON lines"
)]
struct Args {
    /// JSON config file. Environment and flags override its values.
    #[arg(long, env = "STREAMER_CONFIG")]
    config: Option<PathBuf>,

    /// Capture device (`/dev/video0`, `stub://camera0?drop_every=10`).
    #[arg(long)]
    source: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Consumer address as `host:port`. Overrides --host/--port.
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Model artifact handed to the detector backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Detector backend (`stub`, `tract`).
    #[arg(long)]
    backend: Option<String>,

    /// Preview backend (`log`, `none`, `jpeg`).
    #[arg(long)]
    preview: Option<String>,

    /// Cycle scheduling (`sequential`, `staged`).
    #[arg(long)]
    mode: Option<PipelineMode>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            log::error!("detection_streamer: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut cfg = StreamerConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    let cancel = CancelToken::new();
    let presses = AtomicUsize::new(0);
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            log::info!("shutdown signal received, stopping after the current cycle (Ctrl-C again to force)");
            handler_token.cancel();
        } else {
            log::warn!("second shutdown signal, interrupting the connection");
            handler_token.force();
        }
    })
    .context("error setting Ctrl-C handler")?;

    let previewer = build_previewer(&cfg.preview)?;
    log::info!(
        "detection_streamer {} streaming {} -> {}",
        env!("CARGO_PKG_VERSION"),
        cfg.capture.device,
        cfg.endpoint.endpoint()
    );

    let mut collaborators = LiveCollaborators::new(&cfg, cancel.clone());
    let report = Pipeline::new(cfg.pipeline.clone(), cancel).run(&mut collaborators, previewer);

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(fault) = &report.fault {
            log::error!("detection_streamer: {}", fault);
        }
        Ok(ExitCode::FAILURE)
    }
}

fn apply_args(cfg: &mut StreamerConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.capture.device = source.clone();
    }
    if let Some(width) = args.width {
        cfg.capture.width = width;
    }
    if let Some(height) = args.height {
        cfg.capture.height = height;
    }
    if let Some(host) = &args.host {
        cfg.endpoint.host = host.clone();
    }
    if let Some(port) = args.port {
        cfg.endpoint.port = port;
    }
    if let Some(addr) = &args.endpoint {
        let endpoint = Endpoint::parse(addr)?;
        cfg.endpoint.host = endpoint.host;
        cfg.endpoint.port = endpoint.port;
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = model.display().to_string();
    }
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if let Some(preview) = &args.preview {
        cfg.preview.backend = preview.clone();
    }
    if let Some(mode) = args.mode {
        cfg.pipeline.mode = mode;
    }
    Ok(())
}
