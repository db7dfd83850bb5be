use std::sync::Arc;

use crate::datastore::{BoxFuture, Transaction};
use crate::error::{KeelError, Result};

use super::{MigrationLogger, Version};

/// A single versioned, reversible change.
///
/// `up` advances the schema, `down` reverses exactly what `up` did. Both run
/// inside a transaction owned by the runner; they must not commit it.
pub trait MigrationUnit: Send + Sync {
    /// Unique, ordered identifier.
    fn version(&self) -> Version;

    /// Human-readable name (the part after the version in the identifier).
    fn name(&self) -> &str;

    /// Whether `down` can undo this unit.
    fn reversible(&self) -> bool {
        true
    }

    fn up<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>>;

    fn down<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Operation stored by [`FnMigration`].
pub type MigrationOp = Arc<
    dyn for<'a> Fn(&'a mut dyn Transaction, &'a MigrationLogger) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync,
>;

/// A migration unit built from a pair of async functions.
///
/// ```ignore
/// let unit = FnMigration::new(
///     Version::new(20230518180017),
///     "drop_date_of_joining",
///     |tx, _log| Box::pin(async move {
///         tx.execute("ALTER TABLE employee DROP COLUMN date_of_joining").await?;
///         Ok(())
///     }),
///     |tx, _log| Box::pin(async move {
///         tx.execute("ALTER TABLE employee ADD COLUMN date_of_joining DATE").await?;
///         Ok(())
///     }),
/// );
/// ```
#[derive(Clone)]
pub struct FnMigration {
    version: Version,
    name: String,
    up: MigrationOp,
    down: Option<MigrationOp>,
}

impl FnMigration {
    /// Create a reversible unit.
    pub fn new<U, D>(version: Version, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: for<'a> Fn(&'a mut dyn Transaction, &'a MigrationLogger) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
        D: for<'a> Fn(&'a mut dyn Transaction, &'a MigrationLogger) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            version,
            name: name.into(),
            up: Arc::new(up),
            down: Some(Arc::new(down)),
        }
    }

    /// Create a unit that cannot be rolled back.
    pub fn irreversible<U>(version: Version, name: impl Into<String>, up: U) -> Self
    where
        U: for<'a> Fn(&'a mut dyn Transaction, &'a MigrationLogger) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            version,
            name: name.into(),
            up: Arc::new(up),
            down: None,
        }
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("reversible", &self.down.is_some())
            .finish()
    }
}

impl MigrationUnit for FnMigration {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reversible(&self) -> bool {
        self.down.is_some()
    }

    fn up<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>> {
        (self.up)(tx, log)
    }

    fn down<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>> {
        match &self.down {
            Some(down) => down(tx, log),
            None => {
                let version = self.version;
                Box::pin(async move {
                    Err::<(), _>(KeelError::Execution(format!(
                        "Migration {} is irreversible",
                        version
                    )))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::LedgerEntry;

    /// Transaction double that records executed statements.
    #[derive(Default)]
    struct RecordingTx {
        statements: Vec<String>,
    }

    impl Transaction for RecordingTx {
        fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64>> {
            self.statements.push(statement.to_string());
            Box::pin(async { Ok(0) })
        }

        fn insert_ledger_entry<'a>(
            &'a mut self,
            _table: &'a str,
            _entry: &'a LedgerEntry,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_ledger_entry<'a>(
            &'a mut self,
            _table: &'a str,
            _version: Version,
        ) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async { Ok(true) })
        }

        fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn column_migration() -> FnMigration {
        FnMigration::new(
            Version::new(20230518180017),
            "customers_employee_delete_date_of_joining",
            |tx, _log| {
                Box::pin(async move {
                    tx.execute("ALTER TABLE employee DROP COLUMN date_of_joining")
                        .await?;
                    Ok::<(), KeelError>(())
                })
            },
            |tx, _log| {
                Box::pin(async move {
                    tx.execute("ALTER TABLE employee ADD COLUMN date_of_joining DATE")
                        .await?;
                    Ok::<(), KeelError>(())
                })
            },
        )
    }

    #[test]
    fn test_fn_migration_up_and_down() {
        let unit = column_migration();
        let log = MigrationLogger::new(unit.version(), unit.name());
        let mut tx = RecordingTx::default();

        tokio_test::block_on(unit.up(&mut tx, &log)).unwrap();
        tokio_test::block_on(unit.down(&mut tx, &log)).unwrap();

        assert_eq!(
            tx.statements,
            vec![
                "ALTER TABLE employee DROP COLUMN date_of_joining",
                "ALTER TABLE employee ADD COLUMN date_of_joining DATE",
            ]
        );
        assert!(unit.reversible());
    }

    #[test]
    fn test_fn_migration_up_error() {
        let unit = FnMigration::irreversible(Version::new(7), "broken", |_tx, _log| {
            Box::pin(async move { Err::<(), _>(KeelError::Execution("invalid migration".into())) })
        });
        let log = MigrationLogger::new(unit.version(), unit.name());
        let mut tx = RecordingTx::default();

        let err = tokio_test::block_on(unit.up(&mut tx, &log)).unwrap_err();
        assert!(err.to_string().contains("invalid migration"));
    }

    #[test]
    fn test_irreversible_down_fails() {
        let unit = FnMigration::irreversible(Version::new(7), "seed", |_tx, _log| {
            Box::pin(async move { Ok::<(), KeelError>(()) })
        });
        assert!(!unit.reversible());

        let log = MigrationLogger::new(unit.version(), unit.name());
        let mut tx = RecordingTx::default();
        let err = tokio_test::block_on(unit.down(&mut tx, &log)).unwrap_err();
        assert!(err.to_string().contains("irreversible"));
    }
}
