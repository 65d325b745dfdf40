//! Full-mesh hub replication
//!
//! Every hub listens for peers (incoming pool) and dials every configured
//! peer (outgoing pool):
//!
//! ```text
//!   hub A                                   hub B
//!   out ──Hello/SyncRequest──────────────► in
//!       ◄──────────────SyncReply───────────    (A applies B's graph)
//!       ──Node*/Edge* (local changes)─────►    (B applies, source Replication)
//!   in  ◄──────────────────────────────── out  (same, the other way)
//! ```
//!
//! Changes received from a peer are tagged [`ChangeSource::Replication`](crate::graph::ChangeSource::Replication)
//! and never forwarded again. Since every hub dials every other hub, one hop
//! reaches everyone and no loop can form.

pub mod config;

pub use config::ReplicationConfig;

use crate::endpoint::{Capabilities, ConnStatus, Endpoint, GraphSyncHandler, PeerAddress};
use crate::forwarder::{ForwardPolicy, spawn_forwarder};
use crate::graph::Graph;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Connection status of both pools
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeersStatus {
    /// Peers connected to this hub
    pub incomers: BTreeMap<String, ConnStatus>,
    /// Peers this hub dials
    pub outgoers: BTreeMap<String, ConnStatus>,
}

/// Incoming and outgoing peer pools plus the change forwarder
pub struct ReplicationEndpoint {
    graph: Arc<Graph>,
    incoming: Endpoint,
    outgoing: Endpoint,
    peers: Vec<PeerAddress>,
    forwarder: CancellationToken,
    started: AtomicBool,
}

impl ReplicationEndpoint {
    /// Create the endpoint; malformed peer addresses are an error
    pub fn new(graph: Arc<Graph>, config: ReplicationConfig) -> Result<Self> {
        config.transport.validate().map_err(Error::config)?;
        let peers = config.peer_addresses()?;

        let incoming = Endpoint::new(
            "replication-in",
            graph.host(),
            Arc::new(GraphSyncHandler::new(
                graph.clone(),
                Capabilities::replication_incoming(),
            )),
            config.transport.clone(),
        );
        let outgoing = Endpoint::new(
            "replication-out",
            graph.host(),
            Arc::new(GraphSyncHandler::new(
                graph.clone(),
                Capabilities::replication_outgoing(),
            )),
            config.transport,
        );

        Ok(Self {
            graph,
            incoming,
            outgoing,
            peers,
            forwarder: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Configured peers
    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }

    /// Pool of peers connected to this hub
    pub fn incoming(&self) -> &Endpoint {
        &self.incoming
    }

    /// Pool of peers this hub dials
    pub fn outgoing(&self) -> &Endpoint {
        &self.outgoing
    }

    /// Accept peer connections on `addr`
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.incoming.listen(addr).await
    }

    /// Start forwarding local changes and dial every peer
    ///
    /// Calling it again has no effect.
    pub fn connect_peers(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        spawn_forwarder(
            self.graph.clone(),
            self.outgoing.pool().clone(),
            ForwardPolicy::SkipReplicated,
            self.forwarder.clone(),
        );

        for peer in &self.peers {
            tracing::info!("Dialing peer {}", peer);
            self.outgoing.dial(peer.clone());
        }
    }

    /// Stop both pools and the forwarder
    pub fn stop(&self) {
        self.forwarder.cancel();
        self.outgoing.stop();
        self.incoming.stop();
    }

    /// Status of both pools
    pub fn status(&self) -> PeersStatus {
        PeersStatus {
            incomers: self.incoming.status(),
            outgoers: self.outgoing.status(),
        }
    }
}
