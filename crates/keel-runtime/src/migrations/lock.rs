//! Run-scoped mutual exclusion.
//!
//! Serializes whole runner invocations against one datastore, e.g. several
//! replicas starting at the same time.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel_core::config::{MigrationsConfig, DEFAULT_LOCK_KEY};
use keel_core::datastore::{Datastore, LockHandle};
use keel_core::error::{ErrorKind, KeelError, Result};

/// How to acquire the run-scoped lock.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Lock identifier, shared by every process migrating the same datastore.
    pub key: i64,
    /// Give up after this long. Zero means a single attempt.
    pub timeout: Duration,
    /// Delay between attempts.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_LOCK_KEY,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl LockOptions {
    pub fn from_config(config: &MigrationsConfig) -> Self {
        Self {
            key: config.lock_key,
            timeout: config.lock_timeout(),
            poll_interval: config.lock_poll_interval(),
        }
    }
}

/// A held run-scoped lock.
pub struct MigrationLock {
    handle: Box<dyn LockHandle>,
    key: i64,
}

impl MigrationLock {
    /// Poll until the lock is taken, the timeout elapses, or `cancel` fires.
    pub async fn acquire(
        datastore: &dyn Datastore,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        debug!(key = options.key, "Acquiring migration lock...");
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(options.timeout);

        loop {
            let attempt = datastore.try_lock(options.key).await.map_err(|e| match e.kind() {
                ErrorKind::Connectivity | ErrorKind::Lock => e,
                _ => KeelError::Lock(format!("Failed to acquire migration lock: {}", e)),
            })?;

            if let Some(handle) = attempt {
                debug!(key = options.key, "Migration lock acquired");
                return Ok(Self {
                    handle,
                    key: options.key,
                });
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(KeelError::Lock(format!(
                            "Timed out after {:?} waiting for migration lock {}",
                            options.timeout, options.key
                        )));
                    }
                    options.poll_interval.min(deadline - now)
                }
                None => options.poll_interval,
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    return Err(KeelError::Cancelled(
                        "Cancelled while waiting for migration lock".into(),
                    ));
                }
            }
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Release the lock.
    pub async fn release(self) -> Result<()> {
        self.handle.release().await?;
        debug!(key = self.key, "Migration lock released");
        Ok(())
    }
}
