//! Topology graph
//!
//! - [`types`]: node, edge and snapshot records
//! - [`store`]: the lock-guarded graph, its writer and change events

pub mod store;
pub mod types;

pub use store::{
    ChangeSource, DEFAULT_EVENT_CAPACITY, Graph, GraphEvent, GraphState, GraphWriter,
};
pub use types::{Edge, Identifier, Metadata, Node, Snapshot, now_millis};
