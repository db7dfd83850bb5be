use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

/// Default advisory lock key ("KEEL" in ascii).
pub const DEFAULT_LOCK_KEY: i64 = 0x4B45454C;

/// Migration discovery and runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<version>_<name>.up.sql` / `.down.sql` files.
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Tracking table name, optionally schema-qualified.
    #[serde(default = "default_table")]
    pub table: String,

    /// Key of the run-scoped lock.
    #[serde(default = "default_lock_key")]
    pub lock_key: i64,

    /// How long to wait for the run-scoped lock before giving up.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Delay between lock attempts.
    #[serde(default = "default_lock_poll_interval")]
    pub lock_poll_interval_ms: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            table: default_table(),
            lock_key: default_lock_key(),
            lock_timeout_secs: default_lock_timeout(),
            lock_poll_interval_ms: default_lock_poll_interval(),
        }
    }
}

impl MigrationsConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_table_name(&self.table) {
            return Err(KeelError::Config(format!(
                "Invalid migrations table name '{}'",
                self.table
            )));
        }
        Ok(())
    }
}

/// Whether `name` is a plain or schema-qualified SQL identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_identifier(part))
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_dir() -> String {
    "migrations".to_string()
}

fn default_table() -> String {
    "keel_migrations".to_string()
}

fn default_lock_key() -> i64 {
    DEFAULT_LOCK_KEY
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_lock_poll_interval() -> u64 {
    500
}
