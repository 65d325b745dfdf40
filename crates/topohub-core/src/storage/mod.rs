//! Persistent backends and the cached read layer
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        CachedBackend         │  write-through, ID → element arena
//! └──────────────┬───────────────┘
//!                │ (bypassed during host-partition deletion)
//! ┌──────────────┴───────────────┐
//! │   Backend: Memory | LMDB     │  authoritative storage
//! └──────────────────────────────┘
//! ```

pub mod cached;
pub mod lmdb;
pub mod memory;

pub use cached::{CacheStats, CachedBackend};
pub use lmdb::LmdbBackend;
pub use memory::MemoryBackend;

use crate::Result;
use crate::graph::{Edge, Node};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Elements belonging to one producing host
#[derive(Debug, Clone, Default)]
pub struct HostPartition {
    /// Nodes whose host matches
    pub nodes: Vec<Node>,
    /// Edges whose host matches
    pub edges: Vec<Edge>,
}

impl HostPartition {
    /// Whether the partition has no elements
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Authoritative storage for nodes and edges keyed by ID
pub trait Backend: Send + Sync {
    /// Short backend name for logs and status
    fn name(&self) -> &'static str;

    /// Fetch a node
    fn get_node(&self, id: &str) -> Result<Option<Node>>;

    /// Insert or overwrite a node
    fn put_node(&self, node: &Node) -> Result<()>;

    /// Remove a node, returning whether it existed
    fn delete_node(&self, id: &str) -> Result<bool>;

    /// Fetch an edge
    fn get_edge(&self, id: &str) -> Result<Option<Edge>>;

    /// Insert or overwrite an edge
    fn put_edge(&self, edge: &Edge) -> Result<()>;

    /// Remove an edge, returning whether it existed
    fn delete_edge(&self, id: &str) -> Result<bool>;

    /// All elements produced by `host`
    fn list_by_host(&self, host: &str) -> Result<HostPartition>;

    /// Remove every element produced by `host` in one transaction
    ///
    /// Returns what was removed. On error nothing is removed.
    fn delete_partition(&self, host: &str) -> Result<HostPartition>;

    /// Every stored element, used to warm the cache
    fn load_all(&self) -> Result<(Vec<Node>, Vec<Edge>)>;
}

/// Which backend a hub stores its graph in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Volatile, process memory only
    Memory,
    /// LMDB environment under `data_dir`
    Lmdb {
        /// Directory holding the LMDB environment
        data_dir: PathBuf,
        /// LMDB map size in bytes
        #[serde(default = "default_map_size")]
        map_size: usize,
    },
}

fn default_map_size() -> usize {
    lmdb::DEFAULT_MAP_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageConfig {
    /// Open the configured backend
    pub fn open(&self) -> Result<Box<dyn Backend>> {
        match self {
            Self::Memory => Ok(Box::new(MemoryBackend::new())),
            Self::Lmdb { data_dir, map_size } => {
                Ok(Box::new(LmdbBackend::open(data_dir, *map_size)?))
            }
        }
    }
}
