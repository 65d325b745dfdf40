//! In-memory backend

use super::{Backend, HostPartition};
use crate::Result;
use crate::graph::{Edge, Identifier, Node};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile backend holding elements in hash maps
#[derive(Default)]
pub struct MemoryBackend {
    nodes: RwLock<HashMap<Identifier, Node>>,
    edges: RwLock<HashMap<Identifier, Edge>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.read().get(id).cloned())
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        self.nodes.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn delete_node(&self, id: &str) -> Result<bool> {
        Ok(self.nodes.write().remove(id).is_some())
    }

    fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        Ok(self.edges.read().get(id).cloned())
    }

    fn put_edge(&self, edge: &Edge) -> Result<()> {
        self.edges.write().insert(edge.id.clone(), edge.clone());
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<bool> {
        Ok(self.edges.write().remove(id).is_some())
    }

    fn list_by_host(&self, host: &str) -> Result<HostPartition> {
        let nodes = self
            .nodes
            .read()
            .values()
            .filter(|n| n.host == host)
            .cloned()
            .collect();
        let edges = self
            .edges
            .read()
            .values()
            .filter(|e| e.host == host)
            .cloned()
            .collect();
        Ok(HostPartition { nodes, edges })
    }

    fn delete_partition(&self, host: &str) -> Result<HostPartition> {
        let mut nodes = self.nodes.write();
        let mut edges = self.edges.write();
        let mut partition = HostPartition::default();

        nodes.retain(|_, node| {
            if node.host == host {
                partition.nodes.push(node.clone());
                false
            } else {
                true
            }
        });
        edges.retain(|_, edge| {
            if edge.host == host {
                partition.edges.push(edge.clone());
                false
            } else {
                true
            }
        });

        Ok(partition)
    }

    fn load_all(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        Ok((
            self.nodes.read().values().cloned().collect(),
            self.edges.read().values().cloned().collect(),
        ))
    }
}
