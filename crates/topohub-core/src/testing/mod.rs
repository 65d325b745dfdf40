//! Test helpers shared by the unit and integration tests
//!
//! Enabled for `cfg(test)` and through the `testing` feature, which the
//! server crate turns on for its own integration tests.

use crate::endpoint::TransportConfig;
use crate::graph::Graph;
use crate::protocol::{Envelope, Frame, GraphMessage, PROTOCOL_VERSION};
use crate::storage::MemoryBackend;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Graph over a fresh in-memory backend
pub fn memory_graph(host: &str) -> Arc<Graph> {
    Arc::new(Graph::new(host, Box::new(MemoryBackend::new())).expect("memory graph"))
}

/// Transport timings short enough for tests
///
/// Links are declared dead only after ten seconds of silence, since
/// [`TestClient`] never pings on its own.
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        missed_heartbeats_threshold: 50,
        ..TransportConfig::default()
    }
    .with_heartbeat(Duration::from_millis(200))
    .with_connect_timeout(Duration::from_secs(2))
    .with_reconnect(Duration::from_millis(50), Duration::from_millis(400))
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Raw framed client speaking to an endpoint
pub struct TestClient {
    stream: TcpStream,
    server_host: String,
}

impl TestClient {
    /// Connect and handshake as `host` in `role`
    pub async fn connect(addr: SocketAddr, host: &str, role: &str) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        Frame::Hello {
            host: host.to_string(),
            role: role.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
        .write_to(&mut stream)
        .await?;

        match Frame::read_from(&mut stream).await? {
            Frame::Welcome { host } => Ok(Self {
                stream,
                server_host: host,
            }),
            other => Err(Error::protocol(format!("expected Welcome, got {:?}", other))),
        }
    }

    /// Host announced by the server
    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    /// Send a graph message
    pub async fn send(&mut self, message: &GraphMessage) -> Result<()> {
        self.send_envelope(message.to_envelope()?).await
    }

    /// Send a raw envelope
    pub async fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        Frame::Message(envelope).write_to(&mut self.stream).await
    }

    /// Next envelope, skipping heartbeats
    pub async fn recv_envelope(&mut self, timeout: Duration) -> Result<Envelope> {
        loop {
            let frame = tokio::time::timeout(timeout, Frame::read_from(&mut self.stream))
                .await
                .map_err(|_| Error::transport("timed out waiting for a message"))??;
            match frame {
                Frame::Message(envelope) => return Ok(envelope),
                Frame::Ping { timestamp } => {
                    Frame::Pong { timestamp }.write_to(&mut self.stream).await?;
                }
                Frame::Pong { .. } => {}
                other => {
                    return Err(Error::protocol(format!("unexpected frame {:?}", other)));
                }
            }
        }
    }
}
