//! Embedding facade.
//!
//! A service builds a [`Keel`] at startup and calls [`Keel::migrate`] before
//! it starts serving. Every replica may do this concurrently; the run-scoped
//! lock lets exactly one of them apply each pending unit.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use keel_core::config::KeelConfig;
use keel_core::datastore::Datastore;
use keel_core::error::Result;
use keel_core::migration::MigrationUnit;
use keel_runtime::db::Database;
use keel_runtime::migrations::{
    load_migrations_from_dir, MigrationRegistry, MigrationRunner, MigrationStatus, RunResult,
    RunnerOptions,
};

/// Prelude module for common imports.
pub mod prelude {
    pub use chrono::{DateTime, Utc};

    pub use keel_core::config::KeelConfig;
    pub use keel_core::datastore::{BoxFuture, Datastore, Transaction};
    pub use keel_core::error::{ErrorKind, KeelError, Result};
    pub use keel_core::migration::{FnMigration, MigrationLogger, MigrationUnit, Version};
    pub use keel_runtime::migrations::{Direction, RunFailure, RunResult, SqlMigration};

    pub use crate::{Keel, KeelBuilder};
}

/// A configured set of migrations, ready to run against a datastore.
pub struct Keel {
    config: KeelConfig,
    registry: Arc<MigrationRegistry>,
    cancel: CancellationToken,
}

impl Keel {
    /// Create a new builder.
    pub fn builder() -> KeelBuilder {
        KeelBuilder::new()
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Token observed by every runner this instance creates.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open a connection pool from `[database]`.
    pub async fn connect(&self) -> Result<Database> {
        Database::from_config(&self.config.database).await
    }

    /// A runner over `datastore` using this instance's registry and settings.
    pub fn runner(&self, datastore: Arc<dyn Datastore>) -> Result<MigrationRunner> {
        let options = RunnerOptions::from_config(&self.config.migrations);
        Ok(
            MigrationRunner::new(datastore, self.registry.clone(), options)?
                .with_cancellation(self.cancel.clone()),
        )
    }

    /// Apply every pending migration.
    pub async fn migrate(&self, datastore: Arc<dyn Datastore>) -> Result<RunResult> {
        let result = self.runner(datastore)?.run_up().await?;
        match &result.failure {
            Some(failure) => tracing::error!("Migrations stopped: {}", failure),
            None => tracing::info!("Migrations completed ({} applied)", result.versions.len()),
        }
        Ok(result)
    }

    /// Report applied and pending migrations.
    pub async fn status(&self, datastore: Arc<dyn Datastore>) -> Result<MigrationStatus> {
        self.runner(datastore)?.status().await
    }
}

/// Builder for [`Keel`].
pub struct KeelBuilder {
    config: Option<KeelConfig>,
    migrations_dir: Option<PathBuf>,
    units: Vec<Arc<dyn MigrationUnit>>,
    cancel: Option<CancellationToken>,
}

impl KeelBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            migrations_dir: None,
            units: Vec::new(),
            cancel: None,
        }
    }

    /// Set the configuration. Without one, defaults apply and no database
    /// URL is known, so only [`Keel::runner`] with an explicit datastore works.
    pub fn config(mut self, config: KeelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory to load SQL migrations from.
    ///
    /// Defaults to `[migrations].dir`. Files are named like
    /// `20240101120000_create_users.up.sql` with an optional `.down.sql`.
    pub fn migrations_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_dir = Some(path.into());
        self
    }

    /// Add a migration programmatically.
    pub fn migration(mut self, unit: impl MigrationUnit + 'static) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    /// Cancel runs when `token` fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Load the migrations directory and build the registry.
    ///
    /// Fails on malformed files and on duplicate versions across files and
    /// programmatic units.
    pub fn build(self) -> Result<Keel> {
        let config = self
            .config
            .unwrap_or_else(|| KeelConfig::default_with_database_url(""));
        config.validate()?;

        let dir = self
            .migrations_dir
            .unwrap_or_else(|| PathBuf::from(&config.migrations.dir));

        let mut registry = MigrationRegistry::new();
        for unit in load_migrations_from_dir(&dir)? {
            registry.register(Arc::new(unit))?;
        }
        for unit in self.units {
            registry.register(unit)?;
        }
        tracing::debug!("Registered {} migrations", registry.len());

        Ok(Keel {
            config,
            registry: Arc::new(registry),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

impl Default for KeelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
