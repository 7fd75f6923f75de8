//! HTTP exposition of the gauges
//!
//! ## Endpoints
//!
//! - `GET <metrics path>` - Prometheus text format (default `/metrics`)
//! - `GET /health` - Liveness plus manager-interface connection state

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::{Ipv4Addr, SocketAddr};

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:3000")
    pub bind_addr: SocketAddr,

    /// Route serving the Prometheus exposition
    pub metrics_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000)),
            metrics_path: "/metrics".to_string(),
        }
    }
}

pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    Router::new()
        .route(&config.metrics_path, get(routes::metrics::export))
        .route("/health", get(routes::health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// Binds the listener, serves in a background task and returns the bound
/// address (useful with port 0).
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("serving {} on {}", config.metrics_path, addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
