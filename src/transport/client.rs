use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{ConnectError, ConnectionState, Endpoint, RecordSink, SendError};

/// Socket options applied when connecting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Per-address connect timeout. Zero uses the OS default.
    pub connect_timeout: Duration,
    /// Bound on a blocked write. `None` blocks until the peer drains or fails.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// The single outbound connection to the remote consumer.
///
/// Created once before the pipeline runs and never re-established. After any failed
/// write the connection is `Failed` and refuses further sends, because a partially
/// written line would corrupt the framing of everything after it.
pub struct StreamClient {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    state: ConnectionState,
    records_sent: u64,
    bytes_sent: u64,
}

impl StreamClient {
    /// Connect synchronously. Each resolved address is tried in order.
    pub fn connect(endpoint: &Endpoint, options: &ConnectOptions) -> Result<Self, ConnectError> {
        log::info!(
            "StreamClient: {} -> {} ({})",
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            endpoint
        );
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::Resolve {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            });
        }

        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            let attempt = if options.connect_timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, options.connect_timeout)
            };
            match attempt {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(err) => {
                    log::debug!("StreamClient: connect to {} failed: {}", addr, err);
                    last_error = Some(err);
                }
            }
        }
        let stream = connected.ok_or_else(|| ConnectError::Connect {
            endpoint: endpoint.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "connect failed")),
        })?;

        let configure = |result: io::Result<()>| {
            result.map_err(|source| ConnectError::Configure {
                endpoint: endpoint.to_string(),
                source,
            })
        };
        configure(stream.set_nodelay(true))?;
        configure(stream.set_write_timeout(options.write_timeout))?;

        log::info!(
            "StreamClient: {} -> {} ({})",
            ConnectionState::Connecting,
            ConnectionState::Connected,
            endpoint
        );
        Ok(Self {
            endpoint: endpoint.clone(),
            stream: Some(stream),
            state: ConnectionState::Connected,
            records_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Handle that can shut the socket down from another thread, unblocking a
    /// stuck `send`.
    pub fn closer(&self) -> io::Result<StreamCloser> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream closed"))?;
        Ok(StreamCloser {
            stream: stream.try_clone()?,
        })
    }
}

impl RecordSink for StreamClient {
    fn send(&mut self, line: &[u8]) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected(self.state));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SendError::NotConnected(self.state));
        };

        let mut written = 0;
        while written < line.len() {
            match stream.write(&line[written..]) {
                Ok(0) => {
                    self.state = ConnectionState::Failed;
                    return Err(SendError::Write {
                        written,
                        len: line.len(),
                        source: io::Error::new(io::ErrorKind::WriteZero, "peer accepted no bytes"),
                    });
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.state = ConnectionState::Failed;
                    return Err(SendError::Write {
                        written,
                        len: line.len(),
                        source: err,
                    });
                }
            }
        }

        self.records_sent += 1;
        self.bytes_sent += line.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        log::info!(
            "StreamClient: {} -> {} ({}, {} records / {} bytes sent)",
            previous,
            self.state,
            self.endpoint,
            self.records_sent,
            self.bytes_sent
        );
        match stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::debug!("StreamClient: close on drop failed: {}", err);
        }
    }
}

/// Cloned socket handle used to interrupt the connection from another thread.
#[derive(Debug)]
pub struct StreamCloser {
    stream: TcpStream,
}

impl StreamCloser {
    pub fn shutdown(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            if err.kind() != io::ErrorKind::NotConnected {
                log::debug!("StreamCloser: shutdown failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    #[test]
    fn sends_lines_in_order() {
        let (listener, endpoint) = listener();
        let reader = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            BufReader::new(socket)
                .lines()
                .map(|l| l.unwrap())
                .collect::<Vec<_>>()
        });

        let mut client = StreamClient::connect(&endpoint, &ConnectOptions::default()).unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        client.send(b"{\"n\":1}\n").unwrap();
        client.send(b"{\"n\":2}\n").unwrap();
        assert_eq!(client.records_sent, 2);
        assert_eq!(client.bytes_sent, 16);
        client.close().unwrap();
        client.close().unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert_eq!(reader.join().unwrap(), vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let (listener, endpoint) = listener();
        drop(listener);
        let err = StreamClient::connect(&endpoint, &ConnectOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Connect { .. }));
    }

    #[test]
    fn unresolvable_host_fails() {
        let endpoint = Endpoint::new("host.invalid", 4040);
        let err = StreamClient::connect(&endpoint, &ConnectOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConnectError::Resolve { .. } | ConnectError::Connect { .. }
        ));
    }

    #[test]
    fn peer_loss_fails_connection_and_refuses_later_sends() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });
        let mut client = StreamClient::connect(&endpoint, &ConnectOptions::default()).unwrap();
        server.join().unwrap();

        let line = vec![b'x'; 1024];
        let mut failure = None;
        for _ in 0..10_000 {
            if let Err(err) = client.send(&line) {
                failure = Some(err);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(failure, Some(SendError::Write { .. })));
        assert_eq!(client.state(), ConnectionState::Failed);
        assert!(matches!(
            client.send(b"{}\n"),
            Err(SendError::NotConnected(ConnectionState::Failed))
        ));
        client.close().unwrap();
    }

    #[test]
    fn closer_interrupts_connection() {
        let (listener, endpoint) = listener();
        let server = thread::spawn(move || listener.accept().unwrap());
        let mut client = StreamClient::connect(&endpoint, &ConnectOptions::default()).unwrap();
        let _peer = server.join().unwrap();

        client.closer().unwrap().shutdown();
        assert!(client.send(b"{}\n").is_err());
        client.close().unwrap();
    }
}
