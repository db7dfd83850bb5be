use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

/// Timestamp format used for generated migration versions.
const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// Version identifier of a migration unit.
///
/// Versions are positive integers, usually a `YYYYMMDDHHMMSS` timestamp.
/// Apply order is ascending version order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version derived from a point in time.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        // A %Y%m%d%H%M%S rendering of a chrono timestamp is always numeric.
        Self(at.format(VERSION_FORMAT).to_string().parse().unwrap_or_default())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Split a migration identifier like `20230518180017_add_users` into its
    /// version and name.
    ///
    /// A leading `K` is accepted for identifiers written as `K20230518180017`.
    pub fn parse_identifier(identifier: &str) -> Result<(Version, String)> {
        let (prefix, name) = match identifier.split_once('_') {
            Some((prefix, name)) => (prefix, name),
            None => (identifier, ""),
        };
        let version = prefix.parse::<Version>()?;
        Ok((version, name.to_string()))
    }
}

impl FromStr for Version {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix(['K', 'k']).unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeelError::Config(format!(
                "Invalid migration version '{}': expected a numeric prefix",
                s
            )));
        }
        let value: i64 = digits.parse().map_err(|_| {
            KeelError::Config(format!("Migration version '{}' is out of range", s))
        })?;
        if value == 0 {
            return Err(KeelError::Config(format!(
                "Invalid migration version '{}': must be positive",
                s
            )));
        }
        Ok(Self(value))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
