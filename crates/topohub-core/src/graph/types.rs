//! Node and edge records
//!
//! Both are plain values keyed by [`Identifier`]. Edges reference their
//! endpoints by ID only; nothing here holds a live binding to another
//! element, so the graph never forms ownership cycles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Element identifier, stable across hubs
pub type Identifier = String;

/// Free-form element metadata
pub type Metadata = Map<String, Value>;

/// Current time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Topology node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    /// Unique identifier
    #[serde(rename = "ID")]
    pub id: Identifier,
    /// Host that produced the node
    pub host: String,
    /// Metadata key/values
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time (Unix millis)
    #[serde(default)]
    pub created_at: i64,
    /// Last update time (Unix millis)
    #[serde(default)]
    pub updated_at: i64,
    /// Per-element revision
    #[serde(default)]
    pub revision: i64,
}

impl Node {
    /// Create a node stamped with the current time
    pub fn new(id: impl Into<Identifier>, host: impl Into<String>, metadata: Metadata) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            host: host.into(),
            metadata,
            created_at: now,
            updated_at: now,
            revision: 1,
        }
    }
}

/// Topology edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Edge {
    /// Unique identifier
    #[serde(rename = "ID")]
    pub id: Identifier,
    /// Host that produced the edge
    pub host: String,
    /// Parent node ID (may not be known locally yet)
    pub parent: Identifier,
    /// Child node ID (may not be known locally yet)
    pub child: Identifier,
    /// Metadata key/values
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time (Unix millis)
    #[serde(default)]
    pub created_at: i64,
    /// Last update time (Unix millis)
    #[serde(default)]
    pub updated_at: i64,
    /// Per-element revision
    #[serde(default)]
    pub revision: i64,
}

impl Edge {
    /// Create an edge stamped with the current time
    pub fn new(
        id: impl Into<Identifier>,
        host: impl Into<String>,
        parent: impl Into<Identifier>,
        child: impl Into<Identifier>,
        metadata: Metadata,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            host: host.into(),
            parent: parent.into(),
            child: child.into(),
            metadata,
            created_at: now,
            updated_at: now,
            revision: 1,
        }
    }
}

/// Full graph contents at one revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    /// All nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// All edges
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Graph revision the snapshot was taken at
    #[serde(default)]
    pub revision: u64,
}

impl Snapshot {
    /// Whether the snapshot has no elements
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
