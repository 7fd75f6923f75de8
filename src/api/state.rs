//! API shared state

use std::sync::Arc;

use tokio::sync::watch;

use crate::ami::ConnectionState;
use crate::metrics::AsteriskMetrics;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Gauges written by the scheduler
    pub metrics: Arc<AsteriskMetrics>,

    /// Manager-interface session state
    pub connection: watch::Receiver<ConnectionState>,
}

impl ApiState {
    pub fn new(metrics: Arc<AsteriskMetrics>, connection: watch::Receiver<ConnectionState>) -> Self {
        Self {
            metrics,
            connection,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connection.borrow() == ConnectionState::Connected
    }
}
