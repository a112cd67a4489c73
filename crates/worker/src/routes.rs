//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Health check (unauthenticated)
        .route("/v1/health", get(handlers::health_check))
        // Retrieval
        .route(
            "/v1/repos/{name}/document-ranks",
            get(handlers::get_document_ranks),
        )
        .route("/v1/repos/{name}/star-rank", get(handlers::get_star_rank))
        .route(
            "/v1/statistics/reference-counts",
            get(handlers::get_reference_count_statistics),
        )
        .route("/v1/last-updated", post(handlers::get_last_updated))
        // Operator view and control of epochs
        .route("/v1/progress", get(handlers::list_progress))
        .route("/v1/progress/{graph_key}", delete(handlers::delete_progress))
        .route(
            "/v1/derivative-graph-key",
            get(handlers::get_derivative_graph_key).post(handlers::bump_derivative_graph_key),
        )
        .route("/v1/coverage", get(handlers::get_coverage));

    // The metrics endpoint must be network-restricted to the scraper when enabled.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
