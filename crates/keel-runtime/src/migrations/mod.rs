mod generator;
mod ledger;
mod loader;
mod lock;
mod plan;
mod registry;
mod report;
mod runner;
mod sql;

pub use generator::{GeneratedMigration, MigrationGenerator};
pub use ledger::Ledger;
pub use loader::load_migrations_from_dir;
pub use lock::{LockOptions, MigrationLock};
pub use registry::{MigrationRegistry, RegistryBuilder};
pub use report::{
    AppliedMigration, Direction, MigrationStatus, PendingMigration, RunFailure, RunResult,
};
pub use runner::{MigrationRunner, RunnerOptions};
pub use sql::{split_sql_statements, SqlMigration};
