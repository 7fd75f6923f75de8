//! Health check endpoint

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::ApiState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,

    /// `true` while the manager-interface session is up
    pub ami_connected: bool,
}

/// GET /health
///
/// Always answers "ok" while the process serves; a dropped manager session
/// only shows up in `ami_connected` and as -1 gauges.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ami_connected: state.is_connected(),
    })
}
