//! Storage infrastructure - Storage implementations

mod factory;
mod in_memory;
mod postgres;

pub use factory::{StorageFactory, StorageType};
pub use in_memory::InMemoryLimitStorage;
pub use postgres::{PostgresConfig, PostgresLimitStorage};
