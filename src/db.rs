// SPDX-License-Identifier: EUPL-1.2

//! Audit store, Redis cache, directory wiring, and application state.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;

use crate::audit::{AuditLog, MemoryAuditLog};
use crate::audit_pg::PgAuditLog;
use crate::config::Config;
use crate::directory::{CertificateDirectory, Fixtures, UniversityDirectory};
use crate::directory_cache::CachedUniversityDirectory;
use crate::directory_http::{HttpCertificateDirectory, HttpUniversityDirectory};
use crate::engine::VerificationEngine;

/// Shared application state injected into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: VerificationEngine,
    /// Default window for `POST /api/verify/logs/purge` and the startup purge.
    pub retention_days: u32,
}

impl AppState {
    pub fn new(engine: VerificationEngine, retention_days: u32) -> Self {
        Self {
            engine,
            retention_days,
        }
    }

    /// Connect the audit store (PostgreSQL if configured), Redis (optional,
    /// falls back gracefully) and the two directories.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let audit: Arc<dyn AuditLog> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!("Audit log connected to PostgreSQL, migrations applied");
                Arc::new(PgAuditLog::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set — verification log kept in memory only");
                Arc::new(MemoryAuditLog::new())
            }
        };

        let cache = match &config.redis_url {
            Some(url) => match redis::Client::open(url.as_str()) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(mgr) => {
                        tracing::info!("Redis cache connected: {}", url);
                        Some(mgr)
                    }
                    Err(e) => {
                        tracing::warn!("Redis connect failed (cache disabled): {e}");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Redis URL invalid (cache disabled): {e}");
                    None
                }
            },
            None => {
                tracing::info!("REDIS_URL not set — university cache disabled");
                None
            }
        };

        let (certificates, universities): (Arc<dyn CertificateDirectory>, Arc<dyn UniversityDirectory>) =
            match &config.directory_fixtures {
                Some(path) => {
                    let (certs, unis) = Fixtures::load(path).await?.into_directories();
                    let (cert_count, uni_count) = (certs.len().await, unis.len().await);
                    tracing::info!(
                        certificates = cert_count,
                        universities = uni_count,
                        "Directories loaded from {}",
                        path.display()
                    );
                    (Arc::new(certs), Arc::new(unis))
                }
                None => {
                    tracing::info!(
                        certificates = %config.certificate_service_url,
                        universities = %config.university_service_url,
                        "Using HTTP directories"
                    );
                    (
                        Arc::new(HttpCertificateDirectory::new(
                            &config.certificate_service_url,
                            config.directory_timeout,
                        )?),
                        Arc::new(HttpUniversityDirectory::new(
                            &config.university_service_url,
                            config.directory_timeout,
                        )?),
                    )
                }
            };
        let universities = Arc::new(CachedUniversityDirectory::new(
            universities,
            cache,
            config.cache_ttl_secs,
        ));

        let engine =
            VerificationEngine::new(certificates, universities, audit, config.engine_settings());
        Ok(Self::new(engine, config.log_retention_days))
    }
}
