//! Cache domain - optional read-through cache port

mod key;
mod repository;

pub use key::LimitCacheKeys;
pub use repository::{Cache, CacheExt};

#[cfg(test)]
pub use repository::MockCache;
