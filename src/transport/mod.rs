//! Line-delimited TCP transport to the remote consumer.
//!
//! One long-lived, client-initiated connection. Each record is one JSON line; there is
//! no handshake, no acknowledgement and no reconnection, so delivery is at-most-once
//! and a failed write is only visible through `SendError`.

mod client;
mod endpoint;

use std::fmt;
use std::io;

use thiserror::Error;

pub use client::{ConnectOptions, StreamClient, StreamCloser};
pub use endpoint::Endpoint;

/// Lifecycle of the single logical session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure socket for {endpoint}: {source}")]
    Configure {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection is {0}")]
    NotConnected(ConnectionState),
    #[error("write failed after {written} of {len} bytes: {source}")]
    Write {
        written: usize,
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// Destination for serialized records.
///
/// `StreamClient` is the production sink. Implementations must either write a whole
/// line or fail; they are never re-entered across cycles.
pub trait RecordSink: Send {
    /// Write one complete line.
    fn send(&mut self, line: &[u8]) -> Result<(), SendError>;

    /// Release the connection. Idempotent.
    fn close(&mut self) -> io::Result<()>;

    fn state(&self) -> ConnectionState;
}
