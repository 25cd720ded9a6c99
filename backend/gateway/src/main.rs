//! CrowdTank gateway — entry point.
//!
//! Runs the escrow engine in-process behind an Axum REST API.  Every event
//! the engine publishes is handed to a background journal task that
//! persists it to SQLite for later audit.

mod api;
mod config;
mod db;
mod errors;
mod events;
mod journal;

use std::sync::Arc;

use crowdtank_escrow::{Clock, CrowdTank, InMemoryLedger, SystemClock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use journal::JournalSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;

    // ─── Background journal writer ────────────────────────
    let (sink, events) = JournalSink::channel();
    tokio::spawn(journal::run(pool.clone(), events, config.journal_batch_size));

    // ─── Escrow engine ────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let escrow = Arc::new(CrowdTank::new(Arc::new(InMemoryLedger::new()), clock, sink));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { pool, escrow }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
