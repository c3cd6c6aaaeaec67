pub mod local;
pub mod postgres_store;
pub mod sqlite_store;
pub mod store;

pub use local::LocalStore;
pub use store::{open_config_store, ConfigStore, MemoryConfigStore};
