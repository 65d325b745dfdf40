//! Topology snapshot and traversal

use crate::hub::Hub;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use topohub_core::graph::{Edge, Identifier, Node};

/// Full graph at one revision
#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    /// All nodes
    pub nodes: Vec<Node>,
    /// All edges, resolved or not
    pub edges: Vec<Edge>,
    /// Graph revision
    pub revision: u64,
}

/// Nodes reachable from one node
#[derive(Debug, Serialize)]
pub struct ReachableResponse {
    /// Start node
    pub from: Identifier,
    /// Reachable node IDs, breadth-first
    pub reachable: Vec<Identifier>,
    /// Number of reachable nodes
    pub count: usize,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// What went wrong
    pub error: String,
}

/// Snapshot of the whole graph
pub async fn get_topology(State(hub): State<Arc<Hub>>) -> Json<TopologyResponse> {
    let snapshot = hub.graph().snapshot();
    Json(TopologyResponse {
        nodes: snapshot.nodes,
        edges: snapshot.edges,
        revision: snapshot.revision,
    })
}

/// Breadth-first traversal from `id` over resolved edges
pub async fn get_reachable(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    let reachable = hub.graph().read().traverse(&id);
    match reachable {
        Some(reachable) => Json(ReachableResponse {
            from: id,
            count: reachable.len(),
            reachable,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("node {} not found", id),
            }),
        )
            .into_response(),
    }
}
