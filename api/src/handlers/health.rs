use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::db::PoolStatus;

/// Process liveness; never touches the database
#[tracing::instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Database readiness: acquires the pool (creating it if needed) and
/// reports the manager state
#[tracing::instrument(skip(state))]
pub async fn database_health(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<PoolStatus>>, ErrorResponse> {
    state.pool_manager.acquire().await?;
    let status = state.pool_manager.status().await;
    Ok(Json(SuccessResponse::new(status)))
}
