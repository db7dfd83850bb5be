use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;

use keel_core::config::DatabaseConfig;
use keel_core::error::{KeelError, Result};

use super::PgDatastore;

/// Database connection wrapper providing connection pooling.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(KeelError::Config("database.url is not set".into()));
        }

        let pool = Self::create_pool(config)
            .await
            .map_err(|e| KeelError::Connectivity(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_pool(config: &DatabaseConfig) -> sqlx::Result<PgPool> {
        let statement_timeout_ms = statement_timeout_ms(config.statement_timeout_secs);

        PgPoolOptions::new()
            // The migration lock pins one connection for the whole run.
            .max_connections(config.pool_size.max(2))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if let Some(ms) = statement_timeout_ms {
                        conn.execute(format!("SET statement_timeout = {}", ms).as_str())
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Datastore adapter over this pool.
    pub fn datastore(&self) -> PgDatastore {
        PgDatastore::new(self.pool.clone())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| KeelError::Connectivity(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `statement_timeout` in milliseconds, or `None` when disabled.
///
/// Postgres caps the setting at `i32::MAX` milliseconds.
fn statement_timeout_ms(secs: u64) -> Option<u64> {
    (secs > 0).then(|| secs.saturating_mul(1000).min(i32::MAX as u64))
}
