pub mod database;
pub mod queue_store;

pub use database::Database;
pub use queue_store::SqliteQueueStore;
