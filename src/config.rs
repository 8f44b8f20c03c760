//! Runtime configuration loaded from the environment

use std::time::Duration;

use crate::infra::{CoreError, Result, RetryConfig};

/// Storage backend selected by the database URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Sqlite,
}

impl StorageBackend {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(StorageBackend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(StorageBackend::Sqlite)
        } else {
            Err(CoreError::Configuration(format!(
                "unsupported database url scheme: {url}"
            )))
        }
    }
}

/// Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,
    /// Maximum database connections
    pub max_connections: u32,
    /// Apply embedded migrations when connecting
    pub migrate_on_startup: bool,
    /// Retries for threshold actions after the first attempt
    pub threshold_action_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 10,
            migrate_on_startup: true,
            threshold_action_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_connections);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.migrate_on_startup);

        let threshold_action_retries: u32 = std::env::var("THRESHOLD_ACTION_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.threshold_action_retries);

        Self {
            database_url,
            max_connections,
            migrate_on_startup,
            threshold_action_retries,
        }
    }

    pub fn backend(&self) -> Result<StorageBackend> {
        StorageBackend::from_url(&self.database_url)
    }

    /// Backoff schedule for threshold actions
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.threshold_action_retries)
            .with_initial_delay(Duration::from_millis(50))
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}
