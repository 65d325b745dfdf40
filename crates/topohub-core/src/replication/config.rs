//! Replication configuration

use crate::Result;
use crate::endpoint::{PeerAddress, TransportConfig};
use serde::{Deserialize, Serialize};

/// Peer list and transport settings of the replication endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// `host:port` of every peer hub's replication listener
    pub peers: Vec<String>,

    /// Heartbeat and reconnect timings
    pub transport: TransportConfig,
}

impl ReplicationConfig {
    /// Configuration dialing `peers`
    pub fn with_peers<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set transport timings
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Parsed peer addresses
    pub fn peer_addresses(&self) -> Result<Vec<PeerAddress>> {
        self.peers.iter().map(|p| p.parse()).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.transport.validate()?;
        self.peer_addresses().map_err(|e| e.to_string())?;
        Ok(())
    }
}
