pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::profile::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/candidates/:id/profile/updates",
            post(handlers::handle_request_update),
        )
        .route(
            "/api/v1/candidates/:id/profile",
            get(handlers::handle_get_latest),
        )
        .route(
            "/api/v1/candidates/:id/profile/history",
            get(handlers::handle_get_history),
        )
        .with_state(state)
}
