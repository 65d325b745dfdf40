//! One live connection and its outbound queue

use crate::graph::now_millis;
use crate::protocol::{Envelope, Frame};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Accepted by a listener
    Incoming,
    /// Dialed by this hub
    Outgoing,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    /// Dialing or handshaking
    Connecting,
    /// Handshake done
    Connected,
    /// Closed
    Disconnected,
}

/// Status report of one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnStatus {
    /// Remote address
    pub addr: String,
    /// Remote host identity (from the handshake)
    pub host: String,
    /// Role the remote side announced
    pub role: String,
    /// Connection direction
    pub direction: Direction,
    /// Current state
    pub state: ConnState,
    /// Connected since (Unix millis)
    pub connected_since: Option<i64>,
    /// Messages received on the connection
    pub messages_received: u64,
}

/// A connected peer
///
/// Frames queued with [`Speaker::send_frame`] are written by the
/// connection's writer task in queue order.
#[derive(Debug)]
pub struct Speaker {
    id: u64,
    remote_host: String,
    remote_addr: SocketAddr,
    remote_role: String,
    direction: Direction,
    connected_since: i64,
    tx: mpsc::UnboundedSender<Frame>,
    token: CancellationToken,
    disconnected: AtomicBool,
    received: AtomicU64,
}

impl Speaker {
    /// Create a speaker; `token` is cancelled to close the connection
    pub fn new(
        id: u64,
        remote_host: impl Into<String>,
        remote_addr: SocketAddr,
        remote_role: impl Into<String>,
        direction: Direction,
        tx: mpsc::UnboundedSender<Frame>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_host: remote_host.into(),
            remote_addr,
            remote_role: remote_role.into(),
            direction,
            connected_since: now_millis(),
            tx,
            token,
            disconnected: AtomicBool::new(false),
            received: AtomicU64::new(0),
        }
    }

    /// Connection ID, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Host identity announced by the remote side
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Remote socket address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Role announced by the remote side
    pub fn remote_role(&self) -> &str {
        &self.remote_role
    }

    /// Connection direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queue an envelope
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.send_frame(Frame::Message(envelope))
    }

    /// Queue a frame
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport(format!(
                "connection to {} is closed",
                self.remote_host
            )));
        }
        self.tx.send(frame).map_err(|_| {
            Error::transport(format!("writer for {} has stopped", self.remote_host))
        })
    }

    /// Ask the connection tasks to stop
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether close was requested or the connection dropped
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.disconnected.load(Ordering::SeqCst)
    }

    /// Resolves once the connection is closing
    pub async fn closed(&self) {
        self.token.cancelled().await
    }

    /// Mark the connection gone; true only for the first caller
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.token.cancel();
        !self.disconnected.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state
    pub fn state(&self) -> ConnState {
        if self.disconnected.load(Ordering::SeqCst) {
            ConnState::Disconnected
        } else {
            ConnState::Connected
        }
    }

    /// Status report
    pub fn status(&self) -> ConnStatus {
        ConnStatus {
            addr: self.remote_addr.to_string(),
            host: self.remote_host.clone(),
            role: self.remote_role.clone(),
            direction: self.direction,
            state: self.state(),
            connected_since: Some(self.connected_since),
            messages_received: self.received.load(Ordering::Relaxed),
        }
    }
}
