//! LMDB backend
//!
//! Nodes and edges live in two named databases keyed by ID, values encoded
//! as JSON (metadata is schemaless, so a self-describing format is needed).

use super::{Backend, HostPartition};
use crate::graph::{Edge, Node};
use crate::{Error, Result};
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::Arc;

/// Default LMDB map size (1GB)
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Persistent backend on an LMDB environment
pub struct LmdbBackend {
    env: Arc<Env>,
    nodes: Database<Str, SerdeJson<Node>>,
    edges: Database<Str, SerdeJson<Edge>>,
}

impl LmdbBackend {
    /// Open (or create) the environment at `path`
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        if map_size == 0 {
            return Err(Error::storage("LMDB map size must be non-zero"));
        }

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(path)?
        };
        let env = Arc::new(env);

        let mut wtxn = env.write_txn()?;
        let nodes = env.create_database(&mut wtxn, Some("nodes"))?;
        let edges = env.create_database(&mut wtxn, Some("edges"))?;
        wtxn.commit()?;

        tracing::info!("Opened LMDB topology store at {:?}", path);

        Ok(Self { env, nodes, edges })
    }
}

impl Backend for LmdbBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.nodes.get(&rtxn, id)?)
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.nodes.put(&mut wtxn, &node.id, node)?;
        wtxn.commit()?;
        Ok(())
    }

    fn delete_node(&self, id: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.nodes.delete(&mut wtxn, id)?;
        wtxn.commit()?;
        Ok(existed)
    }

    fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.edges.get(&rtxn, id)?)
    }

    fn put_edge(&self, edge: &Edge) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.edges.put(&mut wtxn, &edge.id, edge)?;
        wtxn.commit()?;
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.edges.delete(&mut wtxn, id)?;
        wtxn.commit()?;
        Ok(existed)
    }

    fn list_by_host(&self, host: &str) -> Result<HostPartition> {
        let rtxn = self.env.read_txn()?;
        let mut partition = HostPartition::default();

        for entry in self.nodes.iter(&rtxn)? {
            let (_, node) = entry?;
            if node.host == host {
                partition.nodes.push(node);
            }
        }
        for entry in self.edges.iter(&rtxn)? {
            let (_, edge) = entry?;
            if edge.host == host {
                partition.edges.push(edge);
            }
        }

        Ok(partition)
    }

    fn delete_partition(&self, host: &str) -> Result<HostPartition> {
        let mut wtxn = self.env.write_txn()?;
        let mut partition = HostPartition::default();

        for entry in self.nodes.iter(&wtxn)? {
            let (_, node) = entry?;
            if node.host == host {
                partition.nodes.push(node);
            }
        }
        for entry in self.edges.iter(&wtxn)? {
            let (_, edge) = entry?;
            if edge.host == host {
                partition.edges.push(edge);
            }
        }

        for edge in &partition.edges {
            self.edges.delete(&mut wtxn, &edge.id)?;
        }
        for node in &partition.nodes {
            self.nodes.delete(&mut wtxn, &node.id)?;
        }
        wtxn.commit()?;

        Ok(partition)
    }

    fn load_all(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        let rtxn = self.env.read_txn()?;
        let nodes = self
            .nodes
            .iter(&rtxn)?
            .map(|r| r.map(|(_, n)| n))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let edges = self
            .edges
            .iter(&rtxn)?
            .map(|r| r.map(|(_, e)| e))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((nodes, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Metadata;
    use tempfile::TempDir;

    #[test]
    fn test_lmdb_roundtrip_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
            let mut metadata = Metadata::new();
            metadata.insert("Type".into(), "netns".into());
            backend.put_node(&Node::new("n1", "h1", metadata)).unwrap();
            backend
                .put_edge(&Edge::new("e1", "h1", "n1", "n2", Metadata::new()))
                .unwrap();
        }

        let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
        let node = backend.get_node("n1").unwrap().unwrap();
        assert_eq!(node.metadata["Type"], "netns");

        let (nodes, edges) = backend.load_all().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_lmdb_delete_and_host_listing() {
        let dir = TempDir::new().unwrap();
        let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();

        backend.put_node(&Node::new("n1", "h1", Metadata::new())).unwrap();
        backend.put_node(&Node::new("n2", "h2", Metadata::new())).unwrap();

        assert_eq!(backend.list_by_host("h1").unwrap().nodes.len(), 1);
        assert!(backend.delete_node("n1").unwrap());
        assert!(!backend.delete_node("n1").unwrap());
        assert!(backend.list_by_host("h1").unwrap().is_empty());
    }

    #[test]
    fn test_lmdb_delete_partition_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
            backend.put_node(&Node::new("a", "h1", Metadata::new())).unwrap();
            backend.put_node(&Node::new("b", "h1", Metadata::new())).unwrap();
            backend.put_node(&Node::new("c", "h2", Metadata::new())).unwrap();
            backend
                .put_edge(&Edge::new("e1", "h1", "a", "c", Metadata::new()))
                .unwrap();

            let removed = backend.delete_partition("h1").unwrap();
            assert_eq!(removed.nodes.len(), 2);
            assert_eq!(removed.edges.len(), 1);
        }

        let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
        let (nodes, edges) = backend.load_all().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "c");
        assert!(edges.is_empty());
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(LmdbBackend::open(dir.path(), 0).is_err());
    }
}
