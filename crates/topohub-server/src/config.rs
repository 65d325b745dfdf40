//! Hub configuration
//!
//! Sources, lowest priority first: defaults, TOML file, `TOPOHUB_*`
//! environment variables, command-line flags (applied by the binary).

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use topohub_core::endpoint::TransportConfig;
use topohub_core::graph::DEFAULT_EVENT_CAPACITY;
use topohub_core::replication::ReplicationConfig;
use topohub_core::storage::StorageConfig;

/// Config file read when no path is given, if it exists
pub const DEFAULT_CONFIG_PATH: &str = "config/topohub.toml";

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "TOPOHUB_";

/// Operator overrides for the bundled JSON schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaPaths {
    /// Node schema file
    pub node: Option<PathBuf>,
    /// Edge schema file
    pub edge: Option<PathBuf>,
}

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Identity of this hub, announced in handshakes
    pub host_id: String,
    /// HTTP API bind address
    pub http_addr: SocketAddr,
    /// Pod endpoint bind address
    pub pod_addr: SocketAddr,
    /// Publisher endpoint bind address
    pub publisher_addr: SocketAddr,
    /// Replication endpoint bind address
    pub replication_addr: SocketAddr,
    /// Subscriber endpoint bind address
    pub subscriber_addr: SocketAddr,
    /// Replication addresses of peer hubs
    pub peers: Vec<String>,
    /// Persistent backend
    pub storage: StorageConfig,
    /// Schema overrides
    pub schemas: SchemaPaths,
    /// Heartbeat, timeout and reconnect timings
    pub transport: TransportConfig,
    /// Graph event channel capacity
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host_id: "topohub".to_string(),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8082)),
            pod_addr: SocketAddr::from(([0, 0, 0, 0], 8083)),
            publisher_addr: SocketAddr::from(([0, 0, 0, 0], 8084)),
            replication_addr: SocketAddr::from(([0, 0, 0, 0], 8085)),
            subscriber_addr: SocketAddr::from(([0, 0, 0, 0], 8086)),
            peers: Vec::new(),
            storage: StorageConfig::default(),
            schemas: SchemaPaths::default(),
            transport: TransportConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Every listener on 127.0.0.1 with an ephemeral port
    pub fn ephemeral(host_id: impl Into<String>) -> Self {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            host_id: host_id.into(),
            http_addr: any,
            pod_addr: any,
            publisher_addr: any,
            replication_addr: any,
            subscriber_addr: any,
            ..Default::default()
        }
    }

    /// Parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults, then the config file, then environment overrides
    ///
    /// An explicit `path` must exist; otherwise [`DEFAULT_CONFIG_PATH`] is
    /// read only when present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => {
                tracing::debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TOPOHUB_*` environment overrides
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(host_id) = env("HOST_ID") {
            self.host_id = host_id;
        }
        if let Some(addr) = env_addr("HTTP_ADDR")? {
            self.http_addr = addr;
        }
        if let Some(addr) = env_addr("POD_ADDR")? {
            self.pod_addr = addr;
        }
        if let Some(addr) = env_addr("PUBLISHER_ADDR")? {
            self.publisher_addr = addr;
        }
        if let Some(addr) = env_addr("REPLICATION_ADDR")? {
            self.replication_addr = addr;
        }
        if let Some(addr) = env_addr("SUBSCRIBER_ADDR")? {
            self.subscriber_addr = addr;
        }
        if let Some(peers) = env("PEERS") {
            self.peers = split_list(&peers);
        }
        if let Some(data_dir) = env("DATA_DIR") {
            self.use_data_dir(data_dir);
        }
        if let Some(path) = env("NODE_SCHEMA") {
            self.schemas.node = Some(path.into());
        }
        if let Some(path) = env("EDGE_SCHEMA") {
            self.schemas.edge = Some(path.into());
        }
        Ok(())
    }

    /// Store the graph in LMDB under `data_dir`, keeping a configured map size
    pub fn use_data_dir(&mut self, data_dir: impl Into<PathBuf>) {
        let data_dir = data_dir.into();
        self.storage = match &self.storage {
            StorageConfig::Lmdb { map_size, .. } => StorageConfig::Lmdb {
                data_dir,
                map_size: *map_size,
            },
            StorageConfig::Memory => StorageConfig::Lmdb {
                data_dir,
                map_size: topohub_core::storage::lmdb::DEFAULT_MAP_SIZE,
            },
        };
    }

    /// Replication settings derived from the peer list and transport
    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig::with_peers(self.peers.iter().cloned())
            .with_transport(self.transport.clone())
    }

    /// Reject configurations the hub cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host_id.trim().is_empty() {
            bail!("host_id must not be empty");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be non-zero");
        }
        if let StorageConfig::Lmdb { map_size: 0, .. } = self.storage {
            bail!("storage.map_size must be non-zero");
        }
        self.replication()
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid replication config: {}", e))?;
        Ok(())
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_addr(key: &str) -> anyhow::Result<Option<SocketAddr>> {
    env(key)
        .map(|v| {
            v.parse()
                .with_context(|| format!("Invalid {}{}: {}", ENV_PREFIX, key, v))
        })
        .transpose()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
