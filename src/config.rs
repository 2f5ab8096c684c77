//! Runtime configuration, read once from the environment at startup.
//!
//! Every setting has a default suitable for local development. A numeric
//! variable that is set but unparseable aborts startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::engine::{EngineSettings, MAX_RETENTION_DAYS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Unset: audit entries stay in process memory.
    pub database_url: Option<String>,
    /// Unset: university lookups are not cached.
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
    pub certificate_service_url: String,
    pub university_service_url: String,
    /// Serve both directories from a local JSON file instead of HTTP.
    pub directory_fixtures: Option<PathBuf>,
    pub directory_timeout: Duration,
    pub max_bulk_verification: usize,
    pub bulk_concurrency: usize,
    pub log_retention_days: u32,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("LOG_FORMAT must be `text` or `json`, got `{other}`"),
        };

        let config = Self {
            listen_addr: var("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3004".into()),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            cache_ttl_secs: parse_or(&var, "CACHE_TTL_SECS", 3600)?,
            certificate_service_url: var("CERTIFICATE_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:3003".into()),
            university_service_url: var("UNIVERSITY_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:3002".into()),
            directory_fixtures: var("DIRECTORY_FIXTURES").map(PathBuf::from),
            directory_timeout: Duration::from_millis(parse_or(&var, "DIRECTORY_TIMEOUT_MS", 5000)?),
            max_bulk_verification: parse_or(&var, "MAX_BULK_VERIFICATION", 100)?,
            bulk_concurrency: parse_or(&var, "BULK_CONCURRENCY", 8)?,
            log_retention_days: parse_or(&var, "VERIFICATION_LOG_RETENTION_DAYS", 90)?,
            log_format,
        };

        anyhow::ensure!(config.max_bulk_verification > 0, "MAX_BULK_VERIFICATION must be at least 1");
        anyhow::ensure!(config.bulk_concurrency > 0, "BULK_CONCURRENCY must be at least 1");
        anyhow::ensure!(
            (1..=MAX_RETENTION_DAYS).contains(&config.log_retention_days),
            "VERIFICATION_LOG_RETENTION_DAYS must be between 1 and {MAX_RETENTION_DAYS}"
        );
        Ok(config)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_bulk: self.max_bulk_verification,
            bulk_concurrency: self.bulk_concurrency,
            lookup_timeout: self.directory_timeout,
        }
    }
}

fn parse_or<T>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} is not a valid number: `{raw}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.listen_addr, "0.0.0.0:3004");
        assert_eq!(c.database_url, None);
        assert_eq!(c.cache_ttl_secs, 3600);
        assert_eq!(c.certificate_service_url, "http://localhost:3003");
        assert_eq!(c.university_service_url, "http://localhost:3002");
        assert_eq!(c.directory_timeout, Duration::from_secs(5));
        assert_eq!(c.max_bulk_verification, 100);
        assert_eq!(c.log_retention_days, 90);
        assert_eq!(c.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("MAX_BULK_VERIFICATION", "25"),
            ("DIRECTORY_TIMEOUT_MS", "750"),
            ("DATABASE_URL", "postgres://localhost/verifier"),
            ("LOG_FORMAT", "json"),
            ("REDIS_URL", ""),
        ])
        .unwrap();
        assert_eq!(c.engine_settings().max_bulk, 25);
        assert_eq!(c.engine_settings().lookup_timeout, Duration::from_millis(750));
        assert_eq!(c.database_url.as_deref(), Some("postgres://localhost/verifier"));
        assert_eq!(c.log_format, LogFormat::Json);
        assert_eq!(c.redis_url, None);
    }

    #[test]
    fn malformed_values_abort() {
        let err = config(&[("MAX_BULK_VERIFICATION", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MAX_BULK_VERIFICATION"));
        assert!(config(&[("MAX_BULK_VERIFICATION", "0")]).is_err());
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(config(&[("VERIFICATION_LOG_RETENTION_DAYS", "4000000000")]).is_err());
    }
}
