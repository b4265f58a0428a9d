use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::db;
use crate::state::AppState;

/// GET /health
/// Returns service status, database reachability, and coordinator load.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let database = if db::ping(&state.db).await { "ok" } else { "unreachable" };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "profile-engine",
        "database": database,
        "coordinator": state.profiles.coordinator_stats(),
    }))
}
