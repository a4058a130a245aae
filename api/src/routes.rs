use axum::{
    routing::{get, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/db", get(handlers::health::database_health));

    let merchant_routes = Router::new()
        .route(
            "/api/merchants",
            get(handlers::merchants::list_merchants).post(handlers::merchants::create_merchant),
        )
        .route("/api/merchants/:id", get(handlers::merchants::get_merchant))
        .route(
            "/api/merchants/:id/status",
            put(handlers::merchants::update_merchant_status),
        );

    // Metrics endpoint (no authentication for Prometheus scraping)
    let metrics_routes = Router::new().route("/metrics", get(handlers::metrics::metrics_handler));

    // Combine all routes
    Router::new()
        .merge(health_routes)
        .merge(merchant_routes)
        .merge(metrics_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
