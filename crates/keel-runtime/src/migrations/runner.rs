//! Migration runner with run-scoped locking.
//!
//! Reconciles the registry against the ledger and executes each pending unit
//! in its own transaction, stopping at the first failure.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_core::config::MigrationsConfig;
use keel_core::datastore::{Datastore, Transaction};
use keel_core::error::{KeelError, Result};
use keel_core::migration::{MigrationLogger, MigrationUnit, Version};

use super::ledger::Ledger;
use super::lock::{LockOptions, MigrationLock};
use super::plan;
use super::registry::MigrationRegistry;
use super::report::{
    AppliedMigration, Direction, MigrationStatus, PendingMigration, RunFailure, RunResult,
};

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Tracking table name.
    pub table: String,
    /// Run-scoped lock settings.
    pub lock: LockOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            table: "keel_migrations".to_string(),
            lock: LockOptions::default(),
        }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &MigrationsConfig) -> Self {
        Self {
            table: config.table.clone(),
            lock: LockOptions::from_config(config),
        }
    }
}

/// Which units a run should touch.
enum Selection {
    Up(Option<usize>),
    Down(usize),
    Revert(Vec<Version>),
}

impl Selection {
    fn direction(&self) -> Direction {
        match self {
            Selection::Up(_) => Direction::Up,
            Selection::Down(_) | Selection::Revert(_) => Direction::Down,
        }
    }
}

/// Drives migration units against a datastore.
pub struct MigrationRunner {
    datastore: Arc<dyn Datastore>,
    registry: Arc<MigrationRegistry>,
    ledger: Ledger,
    lock: LockOptions,
    cancel: CancellationToken,
}

impl MigrationRunner {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        registry: Arc<MigrationRegistry>,
        options: RunnerOptions,
    ) -> Result<Self> {
        Ok(Self {
            datastore,
            registry,
            ledger: Ledger::new(options.table)?,
            lock: options.lock,
            cancel: CancellationToken::new(),
        })
    }

    /// Observe `token` between units and while waiting for the lock.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply every pending unit in ascending order.
    pub async fn run_up(&self) -> Result<RunResult> {
        self.run(Selection::Up(None)).await
    }

    /// Apply at most `steps` pending units.
    pub async fn run_up_by(&self, steps: usize) -> Result<RunResult> {
        self.run(Selection::Up(Some(steps))).await
    }

    /// Revert the last `steps` applied units (one when `None`).
    pub async fn run_down(&self, steps: Option<usize>) -> Result<RunResult> {
        self.run(Selection::Down(steps.unwrap_or(1))).await
    }

    /// Revert exactly `versions`, newest first. Versions that are not applied
    /// are skipped.
    pub async fn revert(&self, versions: &[Version]) -> Result<RunResult> {
        self.run(Selection::Revert(versions.to_vec())).await
    }

    /// Report applied and pending units. Takes no lock.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let datastore = self.datastore.as_ref();
        self.ledger.bootstrap(datastore).await?;
        let entries = self.ledger.entries(datastore).await?;

        let applied: Vec<AppliedMigration> = entries
            .iter()
            .map(|entry| {
                let unit = self.registry.get(entry.version);
                AppliedMigration {
                    version: entry.version,
                    name: unit.map(|u| u.name().to_string()),
                    applied_at: entry.applied_at,
                    reversible: unit.map(|u| u.reversible()).unwrap_or(false),
                }
            })
            .collect();

        let applied_versions: BTreeSet<Version> = entries.iter().map(|e| e.version).collect();
        let pending = plan::pending_up(&self.registry.ordered(), &applied_versions, None)
            .into_iter()
            .map(|unit| PendingMigration {
                version: unit.version(),
                name: unit.name().to_string(),
            })
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    async fn run(&self, selection: Selection) -> Result<RunResult> {
        let lock = MigrationLock::acquire(self.datastore.as_ref(), &self.lock, &self.cancel).await?;

        let result = self.run_locked(selection).await;

        // Always release lock, even on error
        if let Err(e) = lock.release().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn run_locked(&self, selection: Selection) -> Result<RunResult> {
        let datastore = self.datastore.as_ref();
        self.ledger.bootstrap(datastore).await?;

        let applied = self.ledger.applied_versions(datastore).await?;
        debug!("Already applied migrations: {:?}", applied);

        let ordered = self.registry.ordered();
        let orphans = plan::orphaned(&ordered, &applied);
        if !orphans.is_empty() {
            warn!(
                "Ledger {} records versions with no registered migration: {:?}",
                self.ledger.table(),
                orphans
            );
        }

        let direction = selection.direction();
        let units = match selection {
            Selection::Up(limit) => plan::pending_up(&ordered, &applied, limit),
            Selection::Down(steps) => plan::rollback_candidates(&ordered, &applied, steps),
            Selection::Revert(targets) => plan::revert_candidates(&ordered, &applied, &targets),
        };

        let mut result = RunResult::new(direction);
        if units.is_empty() {
            info!("No migrations to run ({})", direction);
            return Ok(result);
        }

        if direction == Direction::Down {
            if let Some(unit) = units.iter().find(|unit| !unit.reversible()) {
                let error = KeelError::Execution(format!(
                    "Migration {} ({}) is irreversible",
                    unit.version(),
                    unit.name()
                ));
                error!(version = %unit.version(), "Refusing to roll back: {}", error);
                result.failure = Some(RunFailure::new(unit.version(), error));
                return Ok(result);
            }
        }

        for unit in units {
            if self.cancel.is_cancelled() {
                warn!(version = %unit.version(), "Migration run cancelled");
                result.failure = Some(RunFailure::new(
                    unit.version(),
                    KeelError::Cancelled(format!(
                        "Run cancelled before migration {}",
                        unit.version()
                    )),
                ));
                break;
            }

            match self.execute_unit(unit.as_ref(), direction).await {
                Ok(()) => result.versions.push(unit.version()),
                Err(e) => {
                    error!(
                        version = %unit.version(),
                        migration = %unit.name(),
                        kind = %e.kind(),
                        "Migration failed: {}",
                        e
                    );
                    result.failure = Some(RunFailure::new(unit.version(), e));
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Run one unit in its own transaction.
    async fn execute_unit(&self, unit: &dyn MigrationUnit, direction: Direction) -> Result<()> {
        let log = MigrationLogger::new(unit.version(), unit.name());
        let start = Instant::now();
        match direction {
            Direction::Up => info!("Applying migration: {} {}", unit.version(), unit.name()),
            Direction::Down => info!("Reverting migration: {} {}", unit.version(), unit.name()),
        }

        let mut tx = self.datastore.begin().await?;

        let applied = self.apply_in_tx(unit, direction, tx.as_mut(), &log).await;
        if let Err(e) = applied {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    version = %unit.version(),
                    "Failed to roll back migration transaction: {}",
                    rollback_err
                );
            }
            return Err(e);
        }

        tx.commit().await.map_err(KeelError::into_execution)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match direction {
            Direction::Up => info!(elapsed_ms, "Migration applied: {}", unit.version()),
            Direction::Down => info!(elapsed_ms, "Migration reverted: {}", unit.version()),
        }
        Ok(())
    }

    async fn apply_in_tx(
        &self,
        unit: &dyn MigrationUnit,
        direction: Direction,
        tx: &mut dyn Transaction,
        log: &MigrationLogger,
    ) -> Result<()> {
        match direction {
            Direction::Up => {
                unit.up(&mut *tx, log)
                    .await
                    .map_err(KeelError::into_execution)?;
                self.ledger
                    .record_applied(&mut *tx, unit.version(), Utc::now())
                    .await
            }
            Direction::Down => {
                unit.down(&mut *tx, log)
                    .await
                    .map_err(KeelError::into_execution)?;
                self.ledger.record_reverted(&mut *tx, unit.version()).await
            }
        }
    }
}
