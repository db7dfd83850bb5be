use chrono::{DateTime, Utc};
use serde::Serialize;

use keel_core::error::{ErrorKind, KeelError};
use keel_core::migration::Version;

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// The unit that stopped a run, and why.
#[derive(Debug)]
pub struct RunFailure {
    pub version: Version,
    pub error: KeelError,
}

impl RunFailure {
    pub fn new(version: Version, error: KeelError) -> Self {
        Self { version, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "migration {} failed ({}): {}", self.version, self.kind(), self.error)
    }
}

/// Outcome of one runner invocation.
#[derive(Debug)]
pub struct RunResult {
    pub direction: Direction,
    /// Versions committed by this run, in execution order.
    pub versions: Vec<Version>,
    /// First failure, after which nothing else ran.
    pub failure: Option<RunFailure>,
}

impl RunResult {
    pub(crate) fn new(direction: Direction) -> Self {
        Self {
            direction,
            versions: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Whether the run changed nothing and failed nothing.
    pub fn is_noop(&self) -> bool {
        self.versions.is_empty() && self.failure.is_none()
    }
}

/// An applied version as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: Version,
    /// `None` when the ledger row has no registered unit.
    pub name: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub reversible: bool,
}

/// A registered version not yet applied.
#[derive(Debug, Clone, Serialize)]
pub struct PendingMigration {
    pub version: Version,
    pub name: String,
}

/// Applied and pending units.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<PendingMigration>,
}

impl MigrationStatus {
    /// Applied rows whose unit is no longer registered.
    pub fn orphaned(&self) -> impl Iterator<Item = &AppliedMigration> {
        self.applied.iter().filter(|m| m.name.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_result_flags() {
        let mut result = RunResult::new(Direction::Up);
        assert!(result.is_success());
        assert!(result.is_noop());

        result.versions.push(Version::new(1));
        assert!(!result.is_noop());

        result.failure = Some(RunFailure::new(
            Version::new(2),
            KeelError::Execution("boom".into()),
        ));
        assert!(!result.is_success());
        assert_eq!(result.failure.as_ref().unwrap().kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_failure_display() {
        let failure = RunFailure::new(Version::new(7), KeelError::Lock("busy".into()));
        let text = failure.to_string();
        assert!(text.contains("migration 7"));
        assert!(text.contains("lock"));
        assert!(text.contains("busy"));
    }
}
