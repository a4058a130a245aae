use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use common::db::PgPoolManager;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool_manager: Arc<PgPoolManager>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(pool_manager: Arc<PgPoolManager>, metrics_handle: PrometheusHandle) -> Self {
        Self {
            pool_manager,
            metrics_handle,
        }
    }
}
