//! Connection management and schema migrations.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::TABLES;
use crate::store::{MemoryStore, PgStore, Store};

/// `DATABASE_URL` selecting the in-memory store.
pub const MEMORY_URL: &str = "memory://";

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Opens the configured store, migrating PostgreSQL first.
pub async fn connect_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>, anyhow::Error> {
    if config.url == MEMORY_URL {
        tracing::warn!("Using the in-memory store; data is lost on shutdown");
        return Ok(Arc::new(MemoryStore::new(TABLES)));
    }

    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_url_needs_no_server() {
        let config = DatabaseConfig {
            url: MEMORY_URL.to_string(),
            max_connections: 1,
            min_connections: 1,
        };
        let store = connect_store(&config).await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_create_pool() {
        let config = DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/facility_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        };
        assert!(create_pool(&config).await.is_ok());
    }
}
