//! PostgreSQL datastore adapter.
//!
//! The run-scoped lock is a session-level advisory lock held on a dedicated
//! pooled connection, so lock and unlock always happen on the same session.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use keel_core::datastore::{BoxFuture, Datastore, LedgerEntry, LockHandle, Transaction};
use keel_core::error::{KeelError, Result};
use keel_core::migration::Version;

/// Datastore adapter over a sqlx Postgres pool.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Datastore for PgDatastore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;
            Ok(Box::new(PgTransaction { tx }) as Box<dyn Transaction>)
        })
    }

    fn ensure_ledger<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    version BIGINT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
                table
            );
            sqlx::query(&sql).execute(&self.pool).await?;
            Ok(())
        })
    }

    fn ledger_entries<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT version, applied_at FROM {} ORDER BY version ASC",
                table
            );
            let rows: Vec<(i64, DateTime<Utc>)> =
                sqlx::query_as(&sql).fetch_all(&self.pool).await?;

            Ok(rows
                .into_iter()
                .map(|(version, applied_at)| LedgerEntry {
                    version: Version::new(version),
                    applied_at,
                })
                .collect())
        })
    }

    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<Option<Box<dyn LockHandle>>>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await?;

            if !acquired {
                return Ok(None);
            }

            // If the handle is dropped without release, closing the session
            // frees the advisory lock instead of leaking it back into the pool.
            conn.close_on_drop();
            debug!(key, "Advisory lock acquired");
            Ok(Some(Box::new(PgLockHandle { conn, key }) as Box<dyn LockHandle>))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| KeelError::Connectivity(e.to_string()))?;
            Ok(())
        })
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl Transaction for PgTransaction {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query(statement).execute(&mut *self.tx).await?;
            Ok(result.rows_affected())
        })
    }

    fn insert_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        entry: &'a LedgerEntry,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {} (version, applied_at) VALUES ($1, $2)",
                table
            );
            sqlx::query(&sql)
                .bind(entry.version.as_i64())
                .bind(entry.applied_at)
                .execute(&mut *self.tx)
                .await?;
            Ok(())
        })
    }

    fn delete_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        version: Version,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {} WHERE version = $1", table);
            let result = sqlx::query(&sql)
                .bind(version.as_i64())
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.tx.rollback().await?;
            Ok(())
        })
    }
}

struct PgLockHandle {
    conn: PoolConnection<Postgres>,
    key: i64,
}

impl LockHandle for PgLockHandle {
    fn release(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let PgLockHandle { mut conn, key } = *self;
            let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await?;

            if !released {
                return Err(KeelError::Lock(format!(
                    "Advisory lock {} was not held by this session",
                    key
                )));
            }
            debug!(key, "Advisory lock released");
            Ok(())
        })
    }
}
