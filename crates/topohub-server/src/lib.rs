//! Topohub Server - topology hub process
//!
//! Wires a [`topohub_core::Graph`] to its endpoints and exposes:
//! - TCP endpoints for pods, publishers, subscribers and peer hubs
//! - GET /health - Liveness
//! - GET /api/status - Connection status per pool
//! - GET /api/topology - Graph snapshot
//! - GET /api/topology/nodes/{id}/reachable - Traversal

pub mod api;
pub mod config;
pub mod hub;

pub use config::HubConfig;
pub use hub::{BoundAddrs, Hub, HubStatus, MetadataStore};
