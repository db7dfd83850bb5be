use thiserror::Error;

use crate::migration::Version;

/// Core error type for keel operations.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Duplicate migration version {version}: '{existing}' and '{duplicate}'")]
    DuplicateVersion {
        version: Version,
        existing: String,
        duplicate: String,
    },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Classification of a [`KeelError`], for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Two registered units share a version.
    DuplicateVersion,
    /// The run-scoped lock could not be acquired.
    Lock,
    /// The tracking table could not be read, created or written.
    Ledger,
    /// A unit's `up` or `down` failed.
    Execution,
    /// The datastore itself is unreachable.
    Connectivity,
    /// Invalid configuration or migration sources.
    Config,
    /// The run was cancelled between units.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::DuplicateVersion => write!(f, "duplicate_version"),
            ErrorKind::Lock => write!(f, "lock"),
            ErrorKind::Ledger => write!(f, "ledger"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Connectivity => write!(f, "connectivity"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl KeelError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeelError::DuplicateVersion { .. } => ErrorKind::DuplicateVersion,
            KeelError::Lock(_) => ErrorKind::Lock,
            KeelError::Ledger(_) => ErrorKind::Ledger,
            KeelError::Execution(_) => ErrorKind::Execution,
            KeelError::Connectivity(_) => ErrorKind::Connectivity,
            KeelError::Config(_) | KeelError::Io(_) => ErrorKind::Config,
            KeelError::Cancelled(_) => ErrorKind::Cancelled,
            KeelError::Sql(e) => classify_sql(e),
        }
    }

    /// Re-tag an error raised inside a unit's operation as an execution failure.
    ///
    /// Connectivity failures pass through unchanged.
    pub fn into_execution(self) -> Self {
        match self.kind() {
            ErrorKind::Execution | ErrorKind::Connectivity => self,
            _ => KeelError::Execution(self.to_string()),
        }
    }

    /// Re-tag an error raised while touching the tracking table as a ledger failure.
    ///
    /// Connectivity failures pass through unchanged.
    pub fn into_ledger(self, context: &str) -> Self {
        match self.kind() {
            ErrorKind::Ledger | ErrorKind::Connectivity => self,
            _ => KeelError::Ledger(format!("{}: {}", context, self)),
        }
    }
}

fn classify_sql(e: &sqlx::Error) -> ErrorKind {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorKind::Connectivity,
        sqlx::Error::Configuration(_) => ErrorKind::Config,
        _ => ErrorKind::Execution,
    }
}

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;
