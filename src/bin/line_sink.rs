//! line_sink - Reference consumer for the detection stream.
//!
//! Listens on TCP, decodes each line with the wire codec and logs it. Malformed lines
//! are logged and skipped; the connection stays open.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;

use detection_streamer::codec;

#[derive(Parser, Debug)]
#[command(author, version, about = "Receive and log detection lines")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "LINE_SINK_LISTEN", default_value = "127.0.0.1:4040")]
    listen: String,

    /// Exit after the first connection closes.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Default)]
struct SinkStats {
    accepted: u64,
    rejected: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("failed to listen on {}", args.listen))?;
    log::info!("line_sink listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("accept failed: {}", err);
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        log::info!("connection from {}", peer);

        match consume_lines(BufReader::new(stream), &peer) {
            Ok(stats) => log::info!(
                "{} disconnected: {} records, {} rejected",
                peer,
                stats.accepted,
                stats.rejected
            ),
            Err(err) => log::warn!("{} ended: {:#}", peer, err),
        }
        if args.once {
            break;
        }
    }
    Ok(())
}

fn consume_lines<R: BufRead>(mut reader: R, source: &str) -> Result<SinkStats> {
    let mut stats = SinkStats::default();
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(codec::LINE_DELIMITER, &mut line)
            .with_context(|| format!("failed to read {}", source))?;
        if read == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match codec::decode(&line) {
            Ok(detection) => {
                stats.accepted += 1;
                log::info!(
                    "{} cls_id={} conf={:.2} xyxy={:?}",
                    detection.class_name(),
                    detection.class_id(),
                    detection.confidence(),
                    detection.bounding_box()
                );
            }
            Err(err) => {
                stats.rejected += 1;
                log::warn!(
                    "rejected line from {}: {} ({})",
                    source,
                    err,
                    String::from_utf8_lossy(&line)
                );
            }
        }
    }
    Ok(stats)
}
