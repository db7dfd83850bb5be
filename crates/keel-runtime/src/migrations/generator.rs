use std::path::PathBuf;

use chrono::{DateTime, Utc};

use keel_core::error::{KeelError, Result};
use keel_core::migration::Version;

/// Writes new, empty migration files.
pub struct MigrationGenerator {
    /// Output directory for migrations.
    output_dir: PathBuf,
}

/// Files written by [`MigrationGenerator::create`].
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    pub version: Version,
    pub name: String,
    pub up_path: PathBuf,
    /// `None` for irreversible migrations.
    pub down_path: Option<PathBuf>,
}

impl MigrationGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Create `<version>_<name>.up.sql` (and `.down.sql` when `reversible`),
    /// versioned from `at`.
    pub fn create(
        &self,
        name: &str,
        reversible: bool,
        at: DateTime<Utc>,
    ) -> Result<GeneratedMigration> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(KeelError::Config(
                "Migration name must contain at least one letter or digit".into(),
            ));
        }

        std::fs::create_dir_all(&self.output_dir)?;

        // Two migrations created within the same second would share a version.
        let mut version = Version::from_timestamp(at);
        if let Some(latest) = self.latest_version()? {
            if version <= latest {
                version = Version::new(latest.as_i64().saturating_add(1));
            }
        }
        let stem = format!("{}_{}", version, name);
        let up_path = self.output_dir.join(format!("{}.up.sql", stem));
        let down_path = reversible.then(|| self.output_dir.join(format!("{}.down.sql", stem)));

        for path in std::iter::once(&up_path).chain(down_path.iter()) {
            if path.exists() {
                return Err(KeelError::Config(format!(
                    "Migration file already exists: {:?}",
                    path
                )));
            }
        }

        let created = at.format("%Y-%m-%d %H:%M:%S UTC");
        std::fs::write(
            &up_path,
            format!("-- Migration: {}\n-- Created at: {}\n\n", name, created),
        )?;
        if let Some(down_path) = &down_path {
            std::fs::write(
                down_path,
                format!(
                    "-- Revert: {}\n-- Created at: {}\n-- Must undo exactly what the up file does.\n\n",
                    name, created
                ),
            )?;
        }

        Ok(GeneratedMigration {
            version,
            name,
            up_path,
            down_path,
        })
    }

    /// Highest version among the `.sql` files already in the output directory.
    fn latest_version(&self) -> Result<Option<Version>> {
        if !self.output_dir.exists() {
            return Ok(None);
        }

        let mut latest = None;
        for entry in std::fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".sql") {
                continue;
            }
            let prefix = file_name.split(['_', '.']).next().unwrap_or_default();
            if let Ok(version) = prefix.parse::<Version>() {
                latest = latest.max(Some(version));
            }
        }
        Ok(latest)
    }
}

/// Lowercase, with runs of anything but letters and digits collapsed to `_`.
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}
