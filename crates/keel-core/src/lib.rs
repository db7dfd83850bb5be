pub mod config;
pub mod datastore;
pub mod error;
pub mod migration;

pub use config::KeelConfig;
pub use datastore::{BoxFuture, Datastore, LedgerEntry, LockHandle, Transaction};
pub use error::{ErrorKind, KeelError, Result};
pub use migration::{FnMigration, MigrationLogger, MigrationUnit, Version};
