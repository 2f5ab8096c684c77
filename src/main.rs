//! Certificate Verifier — signature-checked verification of issued academic certificates.
//!
//! Resolves a certificate by id or verification code, checks its status and
//! the issuing university's RSA signature over its content hash, and records
//! every attempt in an append-only verification log.
//!
//! ## Endpoints
//!
//! - `GET  /health`                             — Health check (audit store reachability)
//! - `GET  /health/live`                        — Liveness probe
//! - `GET  /health/ready`                       — Readiness probe
//! - `POST /api/verify`                         — Verify by id or verification code
//! - `GET  /api/verify/{id}`                    — Verify by id
//! - `GET  /api/verify/code/{code}`             — Verify by verification code
//! - `POST /api/verify/bulk`                    — Verify up to `MAX_BULK_VERIFICATION` certificates
//! - `POST /api/verify/signature`               — Check a hash/signature pair against a university key
//! - `POST /api/verify/integrity`               — Recompute a record's content hash
//! - `GET  /api/verify/integrity/{id}`          — Recompute a stored certificate's content hash
//! - `GET  /api/verify/statistics`              — Daily verification statistics
//! - `GET  /api/verify/history/{id}`            — Verification history of one certificate
//! - `POST /api/verify/logs/purge`              — Apply log retention

mod audit;
mod audit_pg;
mod config;
mod crypto;
mod db;
mod directory;
mod directory_cache;
mod directory_http;
mod engine;
mod error;
mod handlers;
mod models;
#[cfg(test)]
mod testing;

use axum::{routing::{get, post}, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, LogFormat};
pub use db::AppState;

fn init_tracing(format: &LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "certificate_verifier=debug,tower_http=info,info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::live))
        .route("/health/ready", get(handlers::ready))
        .route("/api/verify", post(handlers::verify))
        .route("/api/verify/bulk", post(handlers::verify_bulk))
        .route("/api/verify/signature", post(handlers::verify_signature))
        .route("/api/verify/integrity", post(handlers::check_integrity))
        .route("/api/verify/integrity/:certificate_id", get(handlers::check_stored_integrity))
        .route("/api/verify/statistics", get(handlers::statistics))
        .route("/api/verify/history/:certificate_id", get(handlers::history))
        .route("/api/verify/logs/purge", post(handlers::purge_logs))
        .route("/api/verify/code/:verification_code", get(handlers::verify_by_code))
        .route("/api/verify/:certificate_id", get(handlers::verify_by_id))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_format);

    let state = Arc::new(AppState::connect(&config).await?);
    tracing::info!("Certificate Verifier initialised");

    // Startup retention pass; a failure here is not fatal.
    match state.engine.purge(state.retention_days).await {
        Ok(deleted) => tracing::info!(deleted, "Startup log purge complete"),
        Err(e) => tracing::warn!("Startup log purge failed: {e}"),
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Certificate Verifier listening on http://{}", config.listen_addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
