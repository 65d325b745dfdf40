//! Write-through cache in front of a persistent backend
//!
//! The cache holds every element (it is warmed from the backend on open and
//! every write goes to both), so it doubles as the graph's ID-keyed arena.
//! While bypassed, reads go to the backend instead; host-partition deletion
//! runs bypassed so it never walks entries it is in the middle of removing.

use super::{Backend, HostPartition};
use crate::Result;
use crate::graph::{Edge, Identifier, Node};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads answered from the cache
    pub hits: u64,
    /// Reads answered by the backend because the cache was bypassed
    pub bypassed_reads: u64,
    /// Writes (put or delete) pushed through to the backend
    pub writes: u64,
}

/// Cached read layer over a [`Backend`]
pub struct CachedBackend {
    persistent: Box<dyn Backend>,
    nodes: HashMap<Identifier, Node>,
    edges: HashMap<Identifier, Edge>,
    bypass: AtomicBool,
    hits: AtomicU64,
    bypassed_reads: AtomicU64,
    writes: AtomicU64,
}

impl CachedBackend {
    /// Wrap `persistent`, loading its contents into the cache
    pub fn new(persistent: Box<dyn Backend>) -> Result<Self> {
        let (nodes, edges) = persistent.load_all()?;
        tracing::debug!(
            "Warmed {} cache with {} nodes, {} edges",
            persistent.name(),
            nodes.len(),
            edges.len()
        );

        Ok(Self {
            persistent,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges: edges.into_iter().map(|e| (e.id.clone(), e)).collect(),
            bypass: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            bypassed_reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    /// Name of the persistent backend
    pub fn backend_name(&self) -> &'static str {
        self.persistent.name()
    }

    /// Whether reads currently bypass the cache
    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::SeqCst)
    }

    /// Run `f` with reads redirected to the persistent backend
    pub fn with_bypass<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.bypass.store(true, Ordering::SeqCst);
        let result = f(self);
        self.bypass.store(false, Ordering::SeqCst);
        result
    }

    /// Fetch a node
    pub fn get_node(&self, id: &str) -> Result<Option<Cow<'_, Node>>> {
        if self.is_bypassed() {
            self.bypassed_reads.fetch_add(1, Ordering::Relaxed);
            return Ok(self.persistent.get_node(id)?.map(Cow::Owned));
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(self.nodes.get(id).map(Cow::Borrowed))
    }

    /// Fetch an edge
    pub fn get_edge(&self, id: &str) -> Result<Option<Cow<'_, Edge>>> {
        if self.is_bypassed() {
            self.bypassed_reads.fetch_add(1, Ordering::Relaxed);
            return Ok(self.persistent.get_edge(id)?.map(Cow::Owned));
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(self.edges.get(id).map(Cow::Borrowed))
    }

    /// Write a node to the backend, then the cache
    pub fn put_node(&mut self, node: Node) -> Result<()> {
        self.persistent.put_node(&node)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Write an edge to the backend, then the cache
    pub fn put_edge(&mut self, edge: Edge) -> Result<()> {
        self.persistent.put_edge(&edge)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    /// Remove a node from both layers
    pub fn delete_node(&mut self, id: &str) -> Result<bool> {
        let existed = self.persistent.delete_node(id)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(self.nodes.remove(id).is_some() || existed)
    }

    /// Remove an edge from both layers
    pub fn delete_edge(&mut self, id: &str) -> Result<bool> {
        let existed = self.persistent.delete_edge(id)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(self.edges.remove(id).is_some() || existed)
    }

    /// Elements of one host, from the backend when bypassed
    pub fn list_by_host(&self, host: &str) -> Result<HostPartition> {
        if self.is_bypassed() {
            self.bypassed_reads.fetch_add(1, Ordering::Relaxed);
            return self.persistent.list_by_host(host);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(HostPartition {
            nodes: self
                .nodes
                .values()
                .filter(|n| n.host == host)
                .cloned()
                .collect(),
            edges: self
                .edges
                .values()
                .filter(|e| e.host == host)
                .cloned()
                .collect(),
        })
    }

    /// Remove a host's elements from the backend, then from the cache
    ///
    /// The cache is left alone if the backend transaction fails.
    pub fn delete_partition(&mut self, host: &str) -> Result<HostPartition> {
        if self.is_bypassed() {
            self.bypassed_reads.fetch_add(1, Ordering::Relaxed);
        }
        let partition = self.persistent.delete_partition(host)?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        for edge in &partition.edges {
            self.edges.remove(&edge.id);
        }
        for node in &partition.nodes {
            self.nodes.remove(&node.id);
        }

        Ok(partition)
    }

    /// Cached nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Cached edges
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Cached node by ID, without touching counters or the backend
    pub(crate) fn cached_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Cached edge by ID, without touching counters or the backend
    pub(crate) fn cached_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Number of cached nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of cached edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            bypassed_reads: self.bypassed_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Metadata;
    use crate::storage::MemoryBackend;

    fn cached() -> CachedBackend {
        CachedBackend::new(Box::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn test_write_through() {
        let mut cache = cached();
        cache.put_node(Node::new("n1", "h1", Metadata::new())).unwrap();

        assert!(matches!(
            cache.get_node("n1").unwrap(),
            Some(Cow::Borrowed(_))
        ));
        cache.with_bypass(|c| {
            assert!(matches!(c.get_node("n1").unwrap(), Some(Cow::Owned(_))));
        });
        assert_eq!(cache.stats().writes, 1);
    }

    #[test]
    fn test_bypass_reads_hit_backend() {
        let backend = MemoryBackend::new();
        backend.put_node(&Node::new("n1", "h1", Metadata::new())).unwrap();
        let mut cache = CachedBackend::new(Box::new(backend)).unwrap();

        // Warmed from the backend
        assert_eq!(cache.node_count(), 1);

        let partition = cache.with_bypass(|c| {
            assert!(c.is_bypassed());
            c.list_by_host("h1").unwrap()
        });
        assert!(!cache.is_bypassed());
        assert_eq!(partition.nodes.len(), 1);
        assert_eq!(cache.stats().bypassed_reads, 1);
    }

    #[test]
    fn test_delete_missing_is_false() {
        let mut cache = cached();
        assert!(!cache.delete_node("ghost").unwrap());
        assert!(!cache.delete_edge("ghost").unwrap());
    }
}
