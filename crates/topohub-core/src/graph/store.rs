//! Authoritative graph store
//!
//! All state lives behind one `RwLock`. Mutations go through a
//! [`GraphWriter`], which holds the write lock for its whole lifetime, so a
//! batch of mutations (a SyncReply, a host deletion) is atomic with respect
//! to every other connection. Events are sent while the lock is held, which
//! makes broadcast order equal to mutation order.

use super::types::{Edge, Identifier, Node, Snapshot, now_millis};
use crate::protocol::GraphMessage;
use crate::storage::{Backend, CacheStats, CachedBackend, HostPartition};
use crate::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use tokio::sync::broadcast;

/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// Where a mutation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// This hub (API, tests)
    Local,
    /// A local collection agent
    Pod,
    /// An external publisher
    Publisher,
    /// A peer hub
    Replication,
}

/// Change notification emitted after each successful mutation
#[derive(Debug, Clone)]
pub struct GraphEvent {
    /// Graph revision after the mutation
    pub revision: u64,
    /// Origin of the mutation
    pub source: ChangeSource,
    /// The mutation, as it would be sent on the wire
    pub message: GraphMessage,
}

/// Graph contents and revision counter
pub struct GraphState {
    cache: CachedBackend,
    revision: u64,
}

impl GraphState {
    /// Node by ID
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.cache.cached_node(id)
    }

    /// Edge by ID
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.cache.cached_edge(id)
    }

    /// All nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.cache.nodes()
    }

    /// All edges, including dangling ones
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.cache.edges()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.cache.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.cache.edge_count()
    }

    /// Global revision
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether both endpoints of `edge` are present
    pub fn is_resolved(&self, edge: &Edge) -> bool {
        self.node(&edge.parent).is_some() && self.node(&edge.child).is_some()
    }

    /// Full copy of the graph
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
            revision: self.revision,
        }
    }

    /// Children of `id` over resolved edges
    pub fn children(&self, id: &str) -> Vec<&Node> {
        if self.node(id).is_none() {
            return Vec::new();
        }
        self.edges()
            .filter(|e| e.parent == id)
            .filter_map(|e| self.node(&e.child))
            .collect()
    }

    /// Node IDs reachable from `from` over resolved edges, breadth-first
    ///
    /// Returns `None` when `from` is unknown. The start node is not part of
    /// the result unless a cycle leads back to it.
    pub fn traverse(&self, from: &str) -> Option<Vec<Identifier>> {
        self.node(from)?;

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.edges().filter(|e| self.is_resolved(e)) {
            adjacency
                .entry(edge.parent.as_str())
                .or_default()
                .push(edge.child.as_str());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        let mut reached = Vec::new();

        while let Some(current) = queue.pop_front() {
            for &next in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(next) {
                    reached.push(next.to_string());
                    queue.push_back(next);
                }
            }
        }

        Some(reached)
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Name of the persistent backend
    pub fn backend_name(&self) -> &'static str {
        self.cache.backend_name()
    }
}

/// The topology graph
pub struct Graph {
    host: String,
    state: RwLock<GraphState>,
    events: broadcast::Sender<GraphEvent>,
}

impl Graph {
    /// Create a graph over `backend`, warming the cache from it
    pub fn new(host: impl Into<String>, backend: Box<dyn Backend>) -> Result<Self> {
        Self::with_event_capacity(host, backend, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a graph with a specific event channel capacity
    pub fn with_event_capacity(
        host: impl Into<String>,
        backend: Box<dyn Backend>,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("event channel capacity must be non-zero"));
        }
        let cache = CachedBackend::new(backend)?;
        let (events, _) = broadcast::channel(capacity);
        let host = host.into();

        tracing::info!(
            "Graph for {} opened on {} backend ({} nodes, {} edges)",
            host,
            cache.backend_name(),
            cache.node_count(),
            cache.edge_count()
        );

        Ok(Self {
            host,
            state: RwLock::new(GraphState { cache, revision: 0 }),
            events,
        })
    }

    /// Host identifier of this hub
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read()
    }

    /// Exclusive access for mutations attributed to `source`
    pub fn write(&self, source: ChangeSource) -> GraphWriter<'_> {
        GraphWriter {
            state: self.state.write(),
            events: &self.events,
            source,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Global revision
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Full copy of the graph
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().snapshot()
    }
}

/// Write access to the graph
///
/// Holds the exclusive lock until dropped. Never hold one across `.await`.
pub struct GraphWriter<'a> {
    state: RwLockWriteGuard<'a, GraphState>,
    events: &'a broadcast::Sender<GraphEvent>,
    source: ChangeSource,
}

impl GraphWriter<'_> {
    /// Source the mutations are attributed to
    pub fn source(&self) -> ChangeSource {
        self.source
    }

    fn emit(&mut self, message: GraphMessage) {
        self.state.revision += 1;
        let event = GraphEvent {
            revision: self.state.revision,
            source: self.source,
            message,
        };
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Insert a node unless its ID exists
    pub fn add_node(&mut self, mut node: Node) -> Result<bool> {
        if self.state.node(&node.id).is_some() {
            tracing::debug!("Node {} already exists, ignoring add", node.id);
            return Ok(false);
        }
        if node.created_at == 0 {
            node.created_at = now_millis();
        }
        if node.updated_at == 0 {
            node.updated_at = node.created_at;
        }
        node.revision = node.revision.max(1);

        self.state.cache.put_node(node.clone())?;
        self.emit(GraphMessage::NodeAdded(node));
        Ok(true)
    }

    /// Replace the metadata of an existing node
    pub fn update_node(&mut self, node: Node) -> Result<bool> {
        let Some(stored) = self.state.node(&node.id) else {
            tracing::debug!("Node {} not found, ignoring update", node.id);
            return Ok(false);
        };

        let mut updated = stored.clone();
        updated.metadata = node.metadata;
        updated.updated_at = now_millis().max(node.updated_at);
        updated.revision = stored.revision.saturating_add(1).max(node.revision);

        self.state.cache.put_node(updated.clone())?;
        self.emit(GraphMessage::NodeUpdated(updated));
        Ok(true)
    }

    /// Remove a node, leaving its edges in place
    pub fn delete_node(&mut self, id: &str) -> Result<bool> {
        let Some(stored) = self.state.node(id).cloned() else {
            tracing::debug!("Node {} not found, ignoring delete", id);
            return Ok(false);
        };

        self.state.cache.delete_node(id)?;
        self.emit(GraphMessage::NodeDeleted(stored));
        Ok(true)
    }

    /// Insert an edge unless its ID exists
    ///
    /// The endpoints do not need to be present.
    pub fn add_edge(&mut self, mut edge: Edge) -> Result<bool> {
        if self.state.edge(&edge.id).is_some() {
            tracing::debug!("Edge {} already exists, ignoring add", edge.id);
            return Ok(false);
        }
        if edge.created_at == 0 {
            edge.created_at = now_millis();
        }
        if edge.updated_at == 0 {
            edge.updated_at = edge.created_at;
        }
        edge.revision = edge.revision.max(1);

        self.state.cache.put_edge(edge.clone())?;
        self.emit(GraphMessage::EdgeAdded(edge));
        Ok(true)
    }

    /// Replace the metadata of an existing edge
    pub fn update_edge(&mut self, edge: Edge) -> Result<bool> {
        let Some(stored) = self.state.edge(&edge.id) else {
            tracing::debug!("Edge {} not found, ignoring update", edge.id);
            return Ok(false);
        };

        if stored.parent != edge.parent || stored.child != edge.child {
            tracing::debug!(
                "Edge {} update tries to move it ({} -> {}), keeping endpoints",
                edge.id,
                edge.parent,
                edge.child
            );
        }

        let mut updated = stored.clone();
        updated.metadata = edge.metadata;
        updated.updated_at = now_millis().max(edge.updated_at);
        updated.revision = stored.revision.saturating_add(1).max(edge.revision);

        self.state.cache.put_edge(updated.clone())?;
        self.emit(GraphMessage::EdgeUpdated(updated));
        Ok(true)
    }

    /// Remove an edge
    pub fn delete_edge(&mut self, id: &str) -> Result<bool> {
        let Some(stored) = self.state.edge(id).cloned() else {
            tracing::debug!("Edge {} not found, ignoring delete", id);
            return Ok(false);
        };

        self.state.cache.delete_edge(id)?;
        self.emit(GraphMessage::EdgeDeleted(stored));
        Ok(true)
    }

    /// Remove every element owned by `host`
    ///
    /// The backend removes the partition in one transaction; the cache is
    /// only touched once that commits, so a failure leaves both unchanged.
    pub fn delete_host_graph(&mut self, host: &str) -> Result<HostPartition> {
        let partition = self
            .state
            .cache
            .with_bypass(|cache| cache.delete_partition(host))?;

        if partition.is_empty() {
            tracing::debug!("No elements for host {}, nothing to delete", host);
        } else {
            tracing::info!(
                "Deleted host graph {} ({} nodes, {} edges)",
                host,
                partition.nodes.len(),
                partition.edges.len()
            );
            self.emit(GraphMessage::HostGraphDeleted(host.to_string()));
        }

        Ok(partition)
    }

    /// Add every element of `snapshot` whose ID is not yet present
    ///
    /// Returns the number of nodes and edges inserted.
    pub fn apply_sync(&mut self, snapshot: Snapshot) -> Result<(usize, usize)> {
        let mut nodes = 0;
        let mut edges = 0;
        for node in snapshot.nodes {
            if self.add_node(node)? {
                nodes += 1;
            }
        }
        for edge in snapshot.edges {
            if self.add_edge(edge)? {
                edges += 1;
            }
        }
        tracing::debug!("Applied sync: {} new nodes, {} new edges", nodes, edges);
        Ok((nodes, edges))
    }

    /// Apply one decoded mutation message
    ///
    /// Returns whether the graph changed. `SyncRequest` is not a mutation and
    /// is rejected.
    pub fn apply(&mut self, message: GraphMessage) -> Result<bool> {
        match message {
            GraphMessage::SyncRequest => Err(Error::validation(
                "SyncRequest cannot be applied to the graph",
            )),
            GraphMessage::SyncReply(snapshot) => {
                let (nodes, edges) = self.apply_sync(snapshot)?;
                Ok(nodes + edges > 0)
            }
            GraphMessage::NodeAdded(node) => self.add_node(node),
            GraphMessage::NodeUpdated(node) => self.update_node(node),
            GraphMessage::NodeDeleted(node) => self.delete_node(&node.id),
            GraphMessage::EdgeAdded(edge) => self.add_edge(edge),
            GraphMessage::EdgeUpdated(edge) => self.update_edge(edge),
            GraphMessage::EdgeDeleted(edge) => self.delete_edge(&edge.id),
            GraphMessage::HostGraphDeleted(host) => {
                Ok(!self.delete_host_graph(&host)?.is_empty())
            }
        }
    }
}

impl Deref for GraphWriter<'_> {
    type Target = GraphState;

    fn deref(&self) -> &GraphState {
        &self.state
    }
}
