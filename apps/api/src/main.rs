mod config;
mod db;
mod errors;
mod llm_client;
mod profile;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::profile::budget::PromptBudgeter;
use crate::profile::builder::ProfileBuilder;
use crate::profile::coordinator::UpdateCoordinator;
use crate::profile::invoker::AnalysisInvoker;
use crate::profile::service::ProfileService;
use crate::profile::store::{PgProfileStore, PgSourceReader, PgUsageTracker};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting profile engine v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let engine = &config.engine;
    let store = Arc::new(PgProfileStore::new(db.clone()));
    let sources = Arc::new(PgSourceReader::new(db.clone()));
    let invoker = AnalysisInvoker::new(
        Arc::new(llm),
        Arc::new(PgUsageTracker::new(db.clone())),
        engine.invoker.clone(),
    );
    let builder = ProfileBuilder::new(
        store.clone(),
        sources,
        invoker,
        PromptBudgeter::new(engine.prompt_token_ceiling),
    );

    // Spawns the stale-lock sweep; must run inside the runtime
    let coordinator = Arc::new(UpdateCoordinator::new(engine.coordinator.clone()));
    info!(
        window_secs = engine.coordinator.idempotency_window.as_secs(),
        join_timeout_secs = engine.coordinator.join_timeout.as_secs(),
        lock_max_age_secs = engine.coordinator.lock_max_age.as_secs(),
        "Update coordinator started"
    );

    let state = AppState {
        db,
        profiles: ProfileService::new(builder, Arc::clone(&coordinator), store),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the recruiter UI host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received");
}
