mod memory_store;
mod rest_store;
mod sqlite_store;

pub use memory_store::MemoryStore;
pub use rest_store::{RestStore, RestStoreConfig};
pub use sqlite_store::SqliteStore;
