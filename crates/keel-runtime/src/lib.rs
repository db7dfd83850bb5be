pub mod db;
pub mod migrations;

pub use db::{Database, MemoryDatastore, PgDatastore};
pub use migrations::{
    load_migrations_from_dir, Direction, Ledger, MigrationGenerator, MigrationRegistry,
    MigrationRunner, MigrationStatus, RunFailure, RunResult, RunnerOptions, SqlMigration,
};
