//! Topohub Core - topology graph synchronization and replication
//!
//! This crate provides the pieces a topology hub is assembled from:
//! - Graph store: ID-keyed nodes and edges behind one lock, with change events
//! - Storage: in-memory and LMDB backends behind a write-through cache
//! - Protocol: CRC-checked frames carrying `Graph` namespace envelopes
//! - Endpoints: connection pools for pods, publishers, subscribers and peers
//! - Replication: full-mesh peering with bootstrap sync on every connect
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Endpoints (pod, publisher, subscriber)      │
//! │  Replication (incoming + outgoing pools)     │
//! └──────────────┬───────────────────▲───────────┘
//!                │ GraphSyncHandler  │ Forwarder
//! ┌──────────────▼───────────────────┴───────────┐
//! │            Graph (RwLock + events)           │
//! └──────────────┬───────────────────────────────┘
//!                │
//! ┌──────────────▼───────────────────────────────┐
//! │  CachedBackend → Memory | LMDB backend       │
//! └──────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod endpoint;
pub mod error;
pub mod forwarder;
pub mod graph;
pub mod protocol;
pub mod replication;
pub mod schema;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use graph::{ChangeSource, Edge, Graph, GraphEvent, Node, Snapshot};
