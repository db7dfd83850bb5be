use super::Version;

/// Structured logger handed to a unit's `up` and `down`.
///
/// Every record carries the unit's version and name. Logging never affects
/// control flow.
#[derive(Debug, Clone)]
pub struct MigrationLogger {
    version: Version,
    name: String,
}

impl MigrationLogger {
    pub fn new(version: Version, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(version = %self.version, migration = %self.name, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(version = %self.version, migration = %self.name, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(version = %self.version, migration = %self.name, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(version = %self.version, migration = %self.name, "{}", message);
    }
}
