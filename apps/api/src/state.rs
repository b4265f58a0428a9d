use sqlx::PgPool;

use crate::profile::service::ProfileService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Entry point of the profile evolution engine.
    pub profiles: ProfileService,
}
