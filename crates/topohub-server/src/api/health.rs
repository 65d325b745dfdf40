//! Liveness endpoint

use crate::hub::Hub;
use axum::extract::{Json, State};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: &'static str,
    /// Timestamp of the check
    pub timestamp: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
    /// Hub identity
    pub host: String,
    /// Persistent backend name
    pub backend: &'static str,
    /// Current graph revision
    pub revision: u64,
}

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Record the process start time
pub fn init() {
    let _ = START_TIME.set(Instant::now());
}

/// Get health status
pub async fn health_check(State(hub): State<Arc<Hub>>) -> Json<HealthResponse> {
    let uptime = START_TIME.get_or_init(Instant::now).elapsed();
    let (backend, revision) = {
        let state = hub.graph().read();
        (state.backend_name(), state.revision())
    };

    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: uptime.as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: hub.config().host_id.clone(),
        backend,
        revision,
    })
}
