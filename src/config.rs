//! Service configuration

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::aggregates::DeleteMode;
use crate::repository::RetryPolicy;
use crate::storage::DEFAULT_MAX_BYTES;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}: unsupported value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Backoff for transient connection errors
    pub retry: RetryPolicy,
    /// Directory slip files are written to
    pub slip_dir: PathBuf,
    /// Prefix of stored file references, e.g. `/uploads/slips`
    pub slip_public_prefix: String,
    pub slip_max_bytes: usize,
    /// Used when a delete request does not name a mode
    pub delete_mode: DeleteMode,
    pub nats_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let delete_mode = match var("SLIP_DELETE_MODE") {
            None => DeleteMode::Hard,
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key: "SLIP_DELETE_MODE", value: raw })?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(8083),
            db_max_connections: var("DB_MAX_CONNECTIONS").and_then(|p| p.parse().ok()).filter(|n| *n > 0).unwrap_or(10),
            retry: RetryPolicy {
                attempts: var("DB_RETRY_ATTEMPTS").and_then(|p| p.parse().ok()).filter(|n| *n > 0).unwrap_or(3),
                base_delay: Duration::from_millis(var("DB_RETRY_BASE_MS").and_then(|p| p.parse().ok()).unwrap_or(100)),
            },
            slip_dir: var("SLIP_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("uploads/slips")),
            slip_public_prefix: var("SLIP_PUBLIC_PREFIX").unwrap_or_else(|| "/uploads/slips".into()),
            slip_max_bytes: var("SLIP_MAX_BYTES").and_then(|p| p.parse().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_BYTES),
            delete_mode,
            nats_url: var("NATS_URL"),
        })
    }
}
