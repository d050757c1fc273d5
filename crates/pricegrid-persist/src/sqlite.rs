//! SQLite connection setup

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// SQLite configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:pricegrid.db?mode=rwc" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL journal mode for better concurrency
    pub wal_mode: bool,
    /// Enable foreign key enforcement (redaction relies on cascades)
    pub foreign_keys: bool,
    /// Busy timeout in seconds
    pub busy_timeout_secs: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:pricegrid.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    /// Create config for in-memory database (testing).
    ///
    /// Every connection to `:memory:` is its own database, so the pool is
    /// capped at one connection.
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            foreign_keys: true,
            busy_timeout_secs: 5,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);
        let max_connections = std::env::var("PRICEGRID_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|n| n.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        if url.contains(":memory:") {
            return Self {
                url,
                ..Self::memory()
            };
        }

        Self {
            url,
            max_connections,
            ..defaults
        }
    }
}

/// The pragma takes milliseconds
fn busy_timeout_ms(secs: u32) -> u32 {
    secs.saturating_mul(1000)
}

/// SQLite database handle
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect with default config
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        let config = SqliteConfig {
            url: url.to_string(),
            ..Default::default()
        };
        Self::new_with_config(config).await
    }

    /// In-memory database with the schema applied
    pub async fn memory() -> Result<Self, StorageError> {
        Self::new_with_config(SqliteConfig::memory()).await
    }

    /// Connect, apply pragmas and run migrations
    pub async fn new_with_config(config: SqliteConfig) -> Result<Self, StorageError> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if config.foreign_keys {
            options = options.pragma("foreign_keys", "ON");
        }
        options = options.pragma("busy_timeout", busy_timeout_ms(config.busy_timeout_secs).to_string());

        if config.wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(
            url = %config.url,
            wal = config.wal_mode,
            max_connections = config.max_connections,
            "Connected to SQLite"
        );

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_uses_single_connection() {
        let config = SqliteConfig::memory();
        assert_eq!(config.max_connections, 1);
        assert!(!config.wal_mode);
        assert!(config.foreign_keys);
    }

    #[test]
    fn test_busy_timeout_ms_saturates() {
        assert_eq!(busy_timeout_ms(30), 30_000);
        assert_eq!(busy_timeout_ms(u32::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_huge_busy_timeout_connects() {
        let config = SqliteConfig {
            busy_timeout_secs: u32::MAX,
            ..SqliteConfig::memory()
        };
        let backend = SqliteBackend::new_with_config(config).await.unwrap();
        assert!(backend.is_healthy().await);
    }

    #[tokio::test]
    async fn test_memory_backend_runs_migrations() {
        let backend = SqliteBackend::memory().await.unwrap();
        assert!(backend.is_healthy().await);

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'stores', 'gdpr_requests') ORDER BY name",
        )
        .fetch_all(backend.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["gdpr_requests", "jobs", "stores"]);
    }
}
