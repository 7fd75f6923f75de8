//! Prometheus exposition endpoint

use axum::{extract::State, http::header, response::IntoResponse};

use crate::api::{ApiResult, ApiState};

/// GET <metrics path>
pub async fn export(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.encode()?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
