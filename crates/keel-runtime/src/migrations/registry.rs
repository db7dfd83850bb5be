use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::error::{KeelError, Result};
use keel_core::migration::{MigrationUnit, Version};

/// The complete set of known migration units, keyed by version.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    units: BTreeMap<Version, Arc<dyn MigrationUnit>>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    /// Start collecting units for a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register a unit. Fails if its version is already taken.
    pub fn register(&mut self, unit: Arc<dyn MigrationUnit>) -> Result<()> {
        let version = unit.version();
        if let Some(existing) = self.units.get(&version) {
            return Err(KeelError::DuplicateVersion {
                version,
                existing: existing.name().to_string(),
                duplicate: unit.name().to_string(),
            });
        }
        self.units.insert(version, unit);
        Ok(())
    }

    /// Get a unit by version.
    pub fn get(&self, version: Version) -> Option<&Arc<dyn MigrationUnit>> {
        self.units.get(&version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.units.contains_key(&version)
    }

    /// All units in ascending version order (the apply order).
    pub fn ordered(&self) -> Vec<Arc<dyn MigrationUnit>> {
        self.units.values().cloned().collect()
    }

    /// All versions in ascending order.
    pub fn versions(&self) -> Vec<Version> {
        self.units.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Collects units before handing them to [`MigrationRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    units: Vec<Arc<dyn MigrationUnit>>,
}

impl RegistryBuilder {
    /// Add a unit.
    pub fn migration(mut self, unit: impl MigrationUnit + 'static) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    /// Add an already shared unit.
    pub fn shared(mut self, unit: Arc<dyn MigrationUnit>) -> Self {
        self.units.push(unit);
        self
    }

    /// Add every unit from an iterator.
    pub fn extend<I, M>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: MigrationUnit + 'static,
    {
        for unit in units {
            self.units.push(Arc::new(unit));
        }
        self
    }

    /// Build the registry, failing on the first duplicate version.
    pub fn build(self) -> Result<MigrationRegistry> {
        let mut registry = MigrationRegistry::new();
        for unit in self.units {
            registry.register(unit)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::migration::FnMigration;

    fn unit(version: i64, name: &str) -> FnMigration {
        FnMigration::irreversible(Version::new(version), name, |_tx, _log| {
            Box::pin(async move { Ok::<(), KeelError>(()) })
        })
    }

    #[test]
    fn test_empty_registry() {
        let registry = MigrationRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.ordered().is_empty());
    }

    #[test]
    fn test_ordered_ascending() {
        let registry = MigrationRegistry::builder()
            .migration(unit(20240301000000, "third"))
            .migration(unit(20240101000000, "first"))
            .migration(unit(20240201000000, "second"))
            .build()
            .unwrap();

        let names: Vec<String> = registry
            .ordered()
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(
            registry.versions(),
            vec![
                Version::new(20240101000000),
                Version::new(20240201000000),
                Version::new(20240301000000),
            ]
        );
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let err = MigrationRegistry::builder()
            .migration(unit(1, "create_users"))
            .migration(unit(1, "create_posts"))
            .build()
            .err()
            .unwrap();

        match err {
            KeelError::DuplicateVersion {
                version,
                existing,
                duplicate,
            } => {
                assert_eq!(version, Version::new(1));
                assert_eq!(existing, "create_users");
                assert_eq!(duplicate, "create_posts");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_register_keeps_first() {
        let mut registry = MigrationRegistry::new();
        registry.register(Arc::new(unit(1, "a"))).unwrap();
        assert!(registry.register(Arc::new(unit(1, "b"))).is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(Version::new(1)).unwrap().name(), "a");
        assert!(registry.contains(Version::new(1)));
        assert!(!registry.contains(Version::new(2)));
    }
}
