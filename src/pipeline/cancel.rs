use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::StreamCloser;

/// Cooperative stop signal, polled once per cycle.
///
/// `force` additionally shuts down every attached connection so a send blocked on a
/// slow consumer returns instead of waiting out its write timeout.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    forced: AtomicBool,
    closers: Mutex<Vec<StreamCloser>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn force(&self) {
        self.inner.forced.store(true, Ordering::SeqCst);
        self.cancel();
        let closers = self
            .inner
            .closers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for closer in closers.iter() {
            closer.shutdown();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_forced(&self) -> bool {
        self.inner.forced.load(Ordering::SeqCst)
    }

    /// Register a connection to interrupt on `force`.
    pub fn attach(&self, closer: StreamCloser) {
        self.inner
            .closers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(closer);
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("forced", &self.is_forced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectOptions, Endpoint, RecordSink, StreamClient};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
        assert!(!other.is_forced());
    }

    #[test]
    fn force_shuts_down_attached_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let server = thread::spawn(move || listener.accept().unwrap());
        let mut client = StreamClient::connect(&endpoint, &ConnectOptions::default()).unwrap();
        let _peer = server.join().unwrap();

        let token = CancelToken::new();
        token.attach(client.closer().unwrap());
        token.force();

        assert!(token.is_cancelled());
        assert!(client.send(b"{}\n").is_err());
    }
}
