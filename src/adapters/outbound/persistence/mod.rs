mod in_memory_store;
mod sql_store;

pub use in_memory_store::InMemoryStore;
pub use sql_store::SqlStore;
