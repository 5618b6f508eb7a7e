use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl From<&crate::config::DatabaseSettings> for DatabaseConfig {
    fn from(settings: &crate::config::DatabaseSettings) -> Self {
        Self {
            url: settings.url.clone(),
            max_connections: settings.pool_max_connections,
            min_connections: settings.pool_min_connections,
            connect_timeout_secs: settings.pool_acquire_timeout_secs,
            idle_timeout_secs: settings.pool_idle_timeout_secs,
        }
    }
}

/// Errors raised by the storage layer.
///
/// Every repository, including the in-memory ones, reports failures through
/// this type so the services can treat them uniformly as infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Row mapping failed: {0}")]
    Mapping(String),

    #[error("Invalid database configuration: {0}")]
    InvalidConfig(String),
}

impl DatabaseError {
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Unavailable(_) | DatabaseError::ConnectionFailed(_) => true,
            DatabaseError::Query(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if config.url.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "database url is empty".to_string(),
            ));
        }

        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(DatabaseError::ConnectionFailed)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(DatabaseError::MigrationFailed)?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 600);
    }

    #[test]
    fn test_database_config_from_settings() {
        let settings = crate::config::DatabaseSettings {
            url: "postgres://localhost/chat_test".to_string(),
            pool_min_connections: 2,
            pool_max_connections: 4,
            pool_acquire_timeout_secs: 5,
            pool_idle_timeout_secs: 60,
        };
        let config = DatabaseConfig::from(&settings);
        assert_eq!(config.url, "postgres://localhost/chat_test");
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.connect_timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_url() {
        let err = Database::connect(&DatabaseConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::InvalidConfig(_)));
    }

    #[test]
    fn test_unavailable_is_transient() {
        assert!(DatabaseError::Unavailable("timeout".to_string()).is_transient());
        assert!(!DatabaseError::Mapping("bad role".to_string()).is_transient());
        assert!(DatabaseError::Query(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!DatabaseError::Query(sqlx::Error::RowNotFound).is_transient());
    }
}
