//! In-process datastore.
//!
//! Transactions buffer their statements and ledger writes and publish them
//! only on commit, so a rolled-back unit leaves no observable trace. Used by
//! tests and by embedders that want to dry-run a registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use keel_core::datastore::{BoxFuture, Datastore, LedgerEntry, LockHandle, Transaction};
use keel_core::error::{KeelError, Result};
use keel_core::migration::Version;

#[derive(Default)]
struct MemoryState {
    ledgers: HashMap<String, BTreeMap<Version, DateTime<Utc>>>,
    statements: Vec<String>,
    locks: HashSet<i64>,
    failing_statements: Vec<String>,
    fail_commits: usize,
    unreachable: bool,
}

impl MemoryState {
    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(KeelError::Connectivity("datastore unreachable".into()));
        }
        Ok(())
    }
}

enum PendingOp {
    Statement(String),
    Insert(String, LedgerEntry),
    Delete(String, Version),
}

/// In-memory transactional datastore.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement containing `pattern` fail.
    pub async fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.state.lock().await.failing_statements.push(pattern.into());
    }

    /// Make the next `count` commits fail.
    pub async fn fail_next_commits(&self, count: usize) {
        self.state.lock().await.fail_commits = count;
    }

    /// Toggle connectivity failures for every operation.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Committed statements, in commit order.
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    /// Committed versions in `table`, ascending.
    pub async fn applied(&self, table: &str) -> Vec<Version> {
        self.state
            .lock()
            .await
            .ledgers
            .get(table)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Seed a ledger row directly, bypassing any unit.
    pub async fn seed_applied(&self, table: &str, version: Version) {
        self.state
            .lock()
            .await
            .ledgers
            .entry(table.to_string())
            .or_default()
            .insert(version, Utc::now());
    }

    /// Whether the lock identified by `key` is currently held.
    pub async fn is_locked(&self, key: i64) -> bool {
        self.state.lock().await.locks.contains(&key)
    }
}

impl Datastore for MemoryDatastore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>> {
        Box::pin(async move {
            self.state.lock().await.check_reachable()?;
            Ok(Box::new(MemoryTransaction {
                state: self.state.clone(),
                pending: Vec::new(),
            }) as Box<dyn Transaction>)
        })
    }

    fn ensure_ledger<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_reachable()?;
            state.ledgers.entry(table.to_string()).or_default();
            Ok(())
        })
    }

    fn ledger_entries<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_reachable()?;
            let rows = state.ledgers.get(table).ok_or_else(|| {
                KeelError::Execution(format!("relation \"{}\" does not exist", table))
            })?;
            Ok(rows
                .iter()
                .map(|(version, applied_at)| LedgerEntry {
                    version: *version,
                    applied_at: *applied_at,
                })
                .collect())
        })
    }

    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<Option<Box<dyn LockHandle>>>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_reachable()?;
            if !state.locks.insert(key) {
                return Ok(None);
            }
            Ok(Some(Box::new(MemoryLockHandle {
                state: self.state.clone(),
                key,
            }) as Box<dyn LockHandle>))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.state.lock().await.check_reachable() })
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<PendingOp>,
}

impl MemoryTransaction {
    /// Ledger rows of `table` as seen from inside this transaction.
    fn visible_rows(&self, state: &MemoryState, table: &str) -> Result<HashSet<Version>> {
        let mut rows: HashSet<Version> = state
            .ledgers
            .get(table)
            .ok_or_else(|| {
                KeelError::Execution(format!("relation \"{}\" does not exist", table))
            })?
            .keys()
            .copied()
            .collect();

        for op in &self.pending {
            match op {
                PendingOp::Insert(t, entry) if t == table => {
                    rows.insert(entry.version);
                }
                PendingOp::Delete(t, version) if t == table => {
                    rows.remove(version);
                }
                _ => {}
            }
        }
        Ok(rows)
    }
}

impl Transaction for MemoryTransaction {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_reachable()?;
            if let Some(pattern) = state
                .failing_statements
                .iter()
                .find(|p| statement.contains(p.as_str()))
            {
                return Err(KeelError::Execution(format!(
                    "statement rejected (matched '{}'): {}",
                    pattern, statement
                )));
            }
            drop(state);

            self.pending.push(PendingOp::Statement(statement.to_string()));
            Ok(0)
        })
    }

    fn insert_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        entry: &'a LedgerEntry,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_reachable()?;
            let rows = self.visible_rows(&state, table)?;
            drop(state);

            if rows.contains(&entry.version) {
                return Err(KeelError::Execution(format!(
                    "duplicate key value violates unique constraint on \"{}\": version {}",
                    table, entry.version
                )));
            }
            self.pending
                .push(PendingOp::Insert(table.to_string(), entry.clone()));
            Ok(())
        })
    }

    fn delete_ledger_entry<'a>(
        &'a mut self,
        table: &'a str,
        version: Version,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_reachable()?;
            let rows = self.visible_rows(&state, table)?;
            drop(state);

            if !rows.contains(&version) {
                return Ok(false);
            }
            self.pending.push(PendingOp::Delete(table.to_string(), version));
            Ok(true)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let MemoryTransaction { state, pending } = *self;
            let mut state = state.lock().await;
            state.check_reachable()?;
            if state.fail_commits > 0 {
                state.fail_commits -= 1;
                return Err(KeelError::Execution("could not commit transaction".into()));
            }

            for op in pending {
                match op {
                    PendingOp::Statement(sql) => state.statements.push(sql),
                    PendingOp::Insert(table, entry) => {
                        state
                            .ledgers
                            .entry(table)
                            .or_default()
                            .insert(entry.version, entry.applied_at);
                    }
                    PendingOp::Delete(table, version) => {
                        if let Some(rows) = state.ledgers.get_mut(&table) {
                            rows.remove(&version);
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            // Pending operations are discarded with the transaction.
            Ok(())
        })
    }
}

struct MemoryLockHandle {
    state: Arc<Mutex<MemoryState>>,
    key: i64,
}

impl LockHandle for MemoryLockHandle {
    fn release(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.locks.remove(&self.key) {
                return Err(KeelError::Lock(format!("Lock {} was not held", self.key)));
            }
            Ok(())
        })
    }
}
