//! Connection endpoints
//!
//! An [`Endpoint`] owns the [`SpeakerPool`] of one role (pod, publisher,
//! subscriber, replication in/out). It accepts connections (or dials them,
//! see [`client`]), performs the Hello/Welcome handshake and runs two tasks
//! per connection:
//!
//! ```text
//!            ┌──────────── pump (reads frames) ───────────┐
//! socket ───►│ Ping → Pong, Message → handler.on_message  │
//!            └────────────────────────────────────────────┘
//!            ┌──────── writer (drains mpsc queue) ────────┐
//! socket ◄───│ queued frames, Ping on outgoing links      │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! Messages of one connection are handled sequentially on its pump. The
//! disconnect callback runs once, from the pump, whichever side stopped
//! first.

pub mod client;
pub mod config;
pub mod pool;
pub mod speaker;
pub mod sync;

pub use client::PeerAddress;
pub use config::TransportConfig;
pub use pool::SpeakerPool;
pub use speaker::{ConnState, ConnStatus, Direction, Speaker};
pub use sync::{
    Capabilities, GraphSyncHandler, pod_endpoint, publisher_endpoint, subscriber_endpoint,
};

use crate::graph::now_millis;
use crate::protocol::{Envelope, Frame, GRAPH_NAMESPACE, PROTOCOL_VERSION};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error code sent on protocol version mismatch
pub const ERROR_VERSION_MISMATCH: u32 = 1;

/// Error code sent when the first frame is not a Hello
pub const ERROR_EXPECTED_HELLO: u32 = 2;

static NEXT_SPEAKER_ID: AtomicU64 = AtomicU64::new(1);

/// Callbacks invoked by an endpoint
///
/// All callbacks run on the connection's pump task and must not block.
pub trait EndpointHandler: Send + Sync + 'static {
    /// Speaker joined the pool
    fn on_connected(&self, _speaker: &Arc<Speaker>) {}

    /// Speaker left the pool
    fn on_disconnected(&self, _speaker: &Arc<Speaker>) {}

    /// Envelope in one of the endpoint's namespaces
    fn on_message(&self, speaker: &Arc<Speaker>, envelope: Envelope);
}

/// Connection pool manager for one role
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

pub(crate) struct EndpointInner {
    role: String,
    host: String,
    namespaces: Vec<String>,
    pool: Arc<SpeakerPool>,
    handler: Arc<dyn EndpointHandler>,
    transport: TransportConfig,
    shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    dialers: DashMap<String, ConnStatus>,
}

impl Endpoint {
    /// Create an endpoint for `role`, announcing itself as `host`
    pub fn new(
        role: impl Into<String>,
        host: impl Into<String>,
        handler: Arc<dyn EndpointHandler>,
        transport: TransportConfig,
    ) -> Self {
        let role = role.into();
        Self {
            inner: Arc::new(EndpointInner {
                pool: Arc::new(SpeakerPool::new(role.clone())),
                role,
                host: host.into(),
                namespaces: vec![GRAPH_NAMESPACE.to_string()],
                handler,
                transport,
                shutdown: CancellationToken::new(),
                local_addr: Mutex::new(None),
                dialers: DashMap::new(),
            }),
        }
    }

    /// Role name
    pub fn role(&self) -> &str {
        &self.inner.role
    }

    /// Connected speakers
    pub fn pool(&self) -> &Arc<SpeakerPool> {
        &self.inner.pool
    }

    /// Bound listener address, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Bind `addr` and start accepting; returns the bound address
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::transport(format!("{} endpoint cannot bind {}: {}", self.inner.role, addr, e))
        })?;
        let bound = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(bound);
        tracing::info!("{} endpoint listening on {}", self.inner.role, bound);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.accept_loop(listener).await });

        Ok(bound)
    }

    /// Keep a connection to `peer` open, reconnecting with backoff
    pub fn dial(&self, peer: PeerAddress) {
        let inner = self.inner.clone();
        tokio::spawn(async move { client::dial_loop(inner, peer).await });
    }

    /// Stop accepting and dialing, close every speaker
    pub fn stop(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Stopping {} endpoint", self.inner.role);
        self.inner.shutdown.cancel();
        self.inner.pool.close_all();
    }

    /// Whether [`Endpoint::stop`] was called
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Remote host → status, including peers still being dialed
    pub fn status(&self) -> BTreeMap<String, ConnStatus> {
        let mut status = self.inner.pool.status();
        for entry in self.inner.dialers.iter() {
            status
                .entry(entry.key().clone())
                .or_insert_with(|| entry.value().clone());
        }
        status
    }
}

impl EndpointInner {
    pub(crate) fn role(&self) -> &str {
        &self.role
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn set_dialer(&self, peer: &PeerAddress, status: Option<ConnStatus>) {
        match status {
            Some(status) => {
                self.dialers.insert(peer.to_string(), status);
            }
            None => {
                self.dialers.remove(&peer.to_string());
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let inner = self.clone();
                            tokio::spawn(async move { inner.handle_incoming(stream, addr).await });
                        }
                        Err(e) => {
                            tracing::error!("{} accept error: {}", self.role, e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("{} endpoint stopped accepting", self.role);
                    break;
                }
            }
        }
    }

    async fn handle_incoming(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) {
        tracing::debug!("{} connection from {}", self.role, addr);

        let hello = match tokio::time::timeout(
            self.transport.connect_timeout(),
            Frame::read_from(&mut stream),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::error!("Failed to read Hello from {}: {}", addr, e);
                return;
            }
            Err(_) => {
                tracing::error!("Handshake timeout from {}", addr);
                return;
            }
        };

        let (remote_host, remote_role) = match hello {
            Frame::Hello {
                host,
                role,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    tracing::error!(
                        "Rejecting {} ({}): protocol version {}",
                        host,
                        addr,
                        protocol_version
                    );
                    let error = Frame::Error {
                        code: ERROR_VERSION_MISMATCH,
                        message: format!(
                            "Protocol version mismatch: expected {}, got {}",
                            PROTOCOL_VERSION, protocol_version
                        ),
                    };
                    let _ = error.write_to(&mut stream).await;
                    return;
                }
                (host, role)
            }
            _ => {
                tracing::error!("Expected Hello from {}", addr);
                let error = Frame::Error {
                    code: ERROR_EXPECTED_HELLO,
                    message: "Expected Hello".into(),
                };
                let _ = error.write_to(&mut stream).await;
                return;
            }
        };

        let welcome = Frame::Welcome {
            host: self.host.clone(),
        };
        if let Err(e) = welcome.write_to(&mut stream).await {
            tracing::error!("Failed to send Welcome to {}: {}", addr, e);
            return;
        }

        self.run_connection(stream, addr, remote_host, remote_role, Direction::Incoming)
            .await;
    }

    /// Register a handshaken connection and pump it until it closes
    pub(crate) async fn run_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        remote_host: String,
        remote_role: String,
        direction: Direction,
    ) {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let speaker = Arc::new(Speaker::new(
            NEXT_SPEAKER_ID.fetch_add(1, Ordering::Relaxed),
            remote_host,
            addr,
            remote_role,
            direction,
            tx,
            self.shutdown.child_token(),
        ));

        tracing::info!(
            "{} {} ({}) connected from {} ({:?})",
            self.role,
            speaker.remote_host(),
            speaker.remote_role(),
            addr,
            direction
        );

        self.pool.add(speaker.clone());
        self.handler.on_connected(&speaker);

        let ping = direction == Direction::Outgoing;
        let writer_task = tokio::spawn(write_loop(
            speaker.clone(),
            writer,
            rx,
            ping.then(|| self.transport.heartbeat_interval()),
        ));

        self.pump(&speaker, reader).await;

        if speaker.mark_disconnected() {
            self.pool.remove(speaker.id());
            tracing::info!("{} {} disconnected", self.role, speaker.remote_host());
            self.handler.on_disconnected(&speaker);
        }

        let _ = writer_task.await;
    }

    async fn pump(&self, speaker: &Arc<Speaker>, mut reader: OwnedReadHalf) {
        let dead_after = self.transport.dead_after();

        loop {
            let frame = tokio::select! {
                _ = speaker.closed() => break,
                result = tokio::time::timeout(dead_after, Frame::read_from(&mut reader)) => {
                    match result {
                        Ok(Ok(frame)) => frame,
                        Ok(Err(e)) => {
                            tracing::debug!("{} read from {} ended: {}", self.role, speaker.remote_host(), e);
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(
                                "{} {} silent for {:?}, dropping connection",
                                self.role,
                                speaker.remote_host(),
                                dead_after
                            );
                            break;
                        }
                    }
                }
            };

            match frame {
                Frame::Message(envelope) => {
                    speaker.record_received();
                    if self.namespaces.iter().any(|ns| *ns == envelope.namespace) {
                        self.handler.on_message(speaker, envelope);
                    } else {
                        tracing::debug!(
                            "{} ignoring {} message in namespace {}",
                            self.role,
                            envelope.msg_type,
                            envelope.namespace
                        );
                    }
                }
                Frame::Ping { timestamp } => {
                    let _ = speaker.send_frame(Frame::Pong { timestamp });
                }
                Frame::Pong { .. } => {}
                Frame::Error { code, message } => {
                    tracing::error!(
                        "{} {} sent error {}: {}",
                        self.role,
                        speaker.remote_host(),
                        code,
                        message
                    );
                    break;
                }
                Frame::Hello { .. } | Frame::Welcome { .. } => {
                    tracing::warn!(
                        "{} unexpected handshake frame from {}",
                        self.role,
                        speaker.remote_host()
                    );
                }
            }
        }
    }
}

async fn write_loop(
    speaker: Arc<Speaker>,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    heartbeat: Option<std::time::Duration>,
) {
    let period = heartbeat.unwrap_or(std::time::Duration::from_secs(3600));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = speaker.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = frame.write_to(&mut writer).await {
                    tracing::debug!("Write to {} failed: {}", speaker.remote_host(), e);
                    break;
                }
            }
            _ = ticker.tick(), if heartbeat.is_some() => {
                let ping = Frame::Ping { timestamp: now_millis() };
                if let Err(e) = ping.write_to(&mut writer).await {
                    tracing::debug!("Heartbeat to {} failed: {}", speaker.remote_host(), e);
                    break;
                }
            }
        }
    }

    // Wake the pump if the writer stopped first
    speaker.close();
    let _ = writer.shutdown().await;
}
