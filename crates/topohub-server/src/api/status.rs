//! Hub connection status

use crate::hub::{Hub, HubStatus};
use axum::extract::{Json, State};
use std::sync::Arc;

/// Status of every endpoint pool
pub async fn get_status(State(hub): State<Arc<Hub>>) -> Json<HubStatus> {
    Json(hub.status())
}
