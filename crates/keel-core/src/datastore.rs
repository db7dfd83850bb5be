//! Datastore adapter traits.
//!
//! The migration core never talks to a concrete database. It drives these
//! traits, which the hosting application implements (or picks one of the
//! adapters shipped in `keel-runtime`).

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::migration::Version;

/// Boxed, sendable future returned by adapter and unit operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

/// A live connection to the target datastore.
pub trait Datastore: Send + Sync {
    /// Open a new transaction.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>>;

    /// Create the tracking table if it does not exist.
    fn ensure_ledger<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read every row of the tracking table.
    fn ledger_entries<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>>;

    /// Try to take the run-scoped lock identified by `key` without blocking.
    ///
    /// Returns `None` when another holder owns the lock.
    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<Option<Box<dyn LockHandle>>>>;

    /// Check connectivity.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

/// An open transaction.
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction: Send {
    /// Execute a single statement, returning the number of affected rows.
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Insert a row into the tracking table as part of this transaction.
    fn insert_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        entry: &'a LedgerEntry,
    ) -> BoxFuture<'a, Result<()>>;

    /// Delete a row from the tracking table as part of this transaction.
    ///
    /// Returns whether a row was removed.
    fn delete_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        version: Version,
    ) -> BoxFuture<'a, Result<bool>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Proof of holding a run-scoped lock.
pub trait LockHandle: Send {
    /// Release the lock on the session that acquired it.
    fn release(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}
