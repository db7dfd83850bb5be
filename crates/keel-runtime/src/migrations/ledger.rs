use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use keel_core::config::is_valid_table_name;
use keel_core::datastore::{Datastore, LedgerEntry, Transaction};
use keel_core::error::{KeelError, Result};
use keel_core::migration::Version;

/// Durable record of applied versions, stored in the target datastore.
///
/// Writes go through the unit's own transaction so the ledger row and the
/// schema change commit or abort together.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// Create a ledger backed by `table`.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(KeelError::Config(format!(
                "Invalid migrations table name '{}'",
                table
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the tracking table if it is missing. Safe to call on every run.
    pub async fn bootstrap(&self, datastore: &dyn Datastore) -> Result<()> {
        datastore
            .ensure_ledger(&self.table)
            .await
            .map_err(|e| e.into_ledger(&format!("Failed to create table {}", self.table)))?;
        debug!(table = %self.table, "Ledger ready");
        Ok(())
    }

    /// All rows, ascending by version.
    pub async fn entries(&self, datastore: &dyn Datastore) -> Result<Vec<LedgerEntry>> {
        let mut entries = datastore
            .ledger_entries(&self.table)
            .await
            .map_err(|e| e.into_ledger("Failed to get applied migrations"))?;
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    /// The set of applied versions.
    pub async fn applied_versions(&self, datastore: &dyn Datastore) -> Result<BTreeSet<Version>> {
        let entries = self.entries(datastore).await?;
        Ok(entries.into_iter().map(|e| e.version).collect())
    }

    /// Record `version` as applied inside `tx`.
    pub async fn record_applied(
        &self,
        tx: &mut dyn Transaction,
        version: Version,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = LedgerEntry {
            version,
            applied_at,
        };
        tx.insert_ledger_entry(&self.table, &entry)
            .await
            .map_err(|e| e.into_ledger(&format!("Failed to record migration {}", version)))
    }

    /// Remove the row of `version` inside `tx`.
    ///
    /// A missing row means the ledger changed under us; it is reported as a
    /// ledger error so the unit's `down` is rolled back with it.
    pub async fn record_reverted(&self, tx: &mut dyn Transaction, version: Version) -> Result<()> {
        let removed = tx
            .delete_ledger_entry(&self.table, version)
            .await
            .map_err(|e| e.into_ledger(&format!("Failed to remove migration {}", version)))?;

        if !removed {
            return Err(KeelError::Ledger(format!(
                "Migration {} is not recorded in {}",
                version, self.table
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatastore;
    use keel_core::ErrorKind;

    #[test]
    fn test_rejects_bad_table() {
        assert!(Ledger::new("keel_migrations").is_ok());
        assert!(Ledger::new("public.keel_migrations").is_ok());
        assert!(Ledger::new("x; DROP TABLE users").is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let ds = MemoryDatastore::new();
        let ledger = Ledger::new("keel_migrations").unwrap();

        ledger.bootstrap(&ds).await.unwrap();
        ledger.bootstrap(&ds).await.unwrap();
        assert!(ledger.applied_versions(&ds).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_applied_and_reverted() {
        let ds = MemoryDatastore::new();
        let ledger = Ledger::new("keel_migrations").unwrap();
        ledger.bootstrap(&ds).await.unwrap();

        let mut tx = ds.begin().await.unwrap();
        ledger
            .record_applied(tx.as_mut(), Version::new(2), Utc::now())
            .await
            .unwrap();
        ledger
            .record_applied(tx.as_mut(), Version::new(1), Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let entries = ledger.entries(&ds).await.unwrap();
        let versions: Vec<Version> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![Version::new(1), Version::new(2)]);

        let mut tx = ds.begin().await.unwrap();
        ledger.record_reverted(tx.as_mut(), Version::new(2)).await.unwrap();
        tx.commit().await.unwrap();

        let applied = ledger.applied_versions(&ds).await.unwrap();
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec![Version::new(1)]);
    }

    #[tokio::test]
    async fn test_record_reverted_missing_row() {
        let ds = MemoryDatastore::new();
        let ledger = Ledger::new("keel_migrations").unwrap();
        ledger.bootstrap(&ds).await.unwrap();

        let mut tx = ds.begin().await.unwrap();
        let err = ledger
            .record_reverted(tx.as_mut(), Version::new(9))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ledger);
    }

    #[tokio::test]
    async fn test_duplicate_row_is_ledger_error() {
        let ds = MemoryDatastore::new();
        let ledger = Ledger::new("keel_migrations").unwrap();
        ds.seed_applied("keel_migrations", Version::new(1)).await;

        let mut tx = ds.begin().await.unwrap();
        let err = ledger
            .record_applied(tx.as_mut(), Version::new(1), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ledger);
    }

    #[tokio::test]
    async fn test_unreachable_passes_through() {
        let ds = MemoryDatastore::new();
        let ledger = Ledger::new("keel_migrations").unwrap();
        ds.set_unreachable(true).await;

        let err = ledger.bootstrap(&ds).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
}
