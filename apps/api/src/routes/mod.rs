pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::discovery::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Discovery API
        .route("/api/v1/discovery/observe", post(handlers::handle_observe))
        .route(
            "/api/v1/discovery/candidates/:normalized",
            get(handlers::handle_get_candidate),
        )
        .route(
            "/api/v1/discovery/pending",
            get(handlers::handle_list_pending),
        )
        .route("/api/v1/discovery/stats", get(handlers::handle_get_stats))
        .with_state(state)
}
