mod memory;
mod pool;
mod postgres;

pub use memory::MemoryDatastore;
pub use pool::Database;
pub use postgres::PgDatastore;
