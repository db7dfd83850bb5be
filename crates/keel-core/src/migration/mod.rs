mod logger;
mod unit;
mod version;

pub use logger::MigrationLogger;
pub use unit::{FnMigration, MigrationOp, MigrationUnit};
pub use version::Version;
