use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use keel_core::error::{KeelError, Result};
use keel_core::migration::{MigrationUnit, Version};

use super::sql::SqlMigration;

/// Files found for one migration identifier.
#[derive(Default)]
struct MigrationFiles {
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

/// Load SQL migrations from a directory.
///
/// Migrations are named like:
/// - `20240101120000_create_users.up.sql` + `20240101120000_create_users.down.sql`
/// - `20240101120000_seed_roles.sql` (no down, irreversible)
///
/// The result is sorted by version. A missing directory yields no migrations.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<SqlMigration>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut grouped: BTreeMap<String, MigrationFiles> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        if let Some(identifier) = file_name.strip_suffix(".down.sql") {
            let files = grouped.entry(identifier.to_string()).or_default();
            files.down = Some(path.clone());
        } else if let Some(identifier) = file_name
            .strip_suffix(".up.sql")
            .or_else(|| file_name.strip_suffix(".sql"))
        {
            let files = grouped.entry(identifier.to_string()).or_default();
            if let Some(existing) = &files.up {
                return Err(KeelError::Config(format!(
                    "Migration '{}' has two up files: {:?} and {:?}",
                    identifier, existing, path
                )));
            }
            files.up = Some(path.clone());
        }
    }

    let mut migrations: Vec<SqlMigration> = Vec::with_capacity(grouped.len());
    let mut seen: BTreeMap<Version, String> = BTreeMap::new();

    for (identifier, files) in grouped {
        let Some(up_path) = files.up else {
            return Err(KeelError::Config(format!(
                "Migration '{}' has a down file but no up file",
                identifier
            )));
        };

        let (version, name) = Version::parse_identifier(&identifier)?;
        if let Some(existing) = seen.insert(version, identifier.clone()) {
            return Err(KeelError::DuplicateVersion {
                version,
                existing,
                duplicate: identifier,
            });
        }

        let mut migration = SqlMigration::new(version, name, std::fs::read_to_string(&up_path)?);
        if let Some(down_path) = files.down {
            migration = migration.with_down(std::fs::read_to_string(&down_path)?);
        }
        migrations.push(migration);
    }

    migrations.sort_by_key(|m| m.version());

    debug!("Loaded {} migrations from {:?}", migrations.len(), dir);
    Ok(migrations)
}
