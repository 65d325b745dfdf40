//! HTTP API handlers
//!
//! - `GET /health` - liveness, uptime and version
//! - `GET /api/status` - connection status of every pool
//! - `GET /api/topology` - full graph snapshot
//! - `GET /api/topology/nodes/{id}/reachable` - traversal from a node

pub mod health;
pub mod status;
pub mod topology;

use crate::hub::Hub;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the API router over `hub`
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/status", get(status::get_status))
        .route("/api/topology", get(topology::get_topology))
        .route(
            "/api/topology/nodes/{id}/reachable",
            get(topology::get_reachable),
        )
        .with_state(hub)
        .layer(TraceLayer::new_for_http())
}
