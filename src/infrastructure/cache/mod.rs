//! Cache infrastructure - Cache implementations

mod advisory;
mod factory;
mod in_memory;

pub use advisory::AdvisoryCache;
pub use factory::CacheFactory;
pub use in_memory::{InMemoryCache, InMemoryCacheConfig};
