//! keel - versioned schema migrations.
//!
//! Ordered, reversible migration units applied to a transactional datastore
//! exactly once, tracked in a ledger table and serialized across processes
//! by a run-scoped lock.

mod runtime;

pub use keel_core;
pub use keel_runtime;

pub use keel_core::{
    Datastore, ErrorKind, FnMigration, KeelConfig, KeelError, MigrationLogger, MigrationUnit,
    Result, Transaction, Version,
};
pub use keel_runtime::{
    Database, Direction, MemoryDatastore, MigrationRegistry, MigrationRunner, MigrationStatus,
    PgDatastore, RunFailure, RunResult, RunnerOptions, SqlMigration,
};

pub use runtime::prelude;
pub use runtime::{Keel, KeelBuilder};
