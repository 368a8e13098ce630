//! Cache factory for runtime selection

use std::sync::Arc;

use crate::config::CacheSettings;
use crate::domain::cache::Cache;

use super::in_memory::{InMemoryCache, InMemoryCacheConfig};

/// Factory for creating cache instances
#[derive(Debug)]
pub struct CacheFactory;

impl CacheFactory {
    /// Returns `None` when caching is disabled
    pub fn create(settings: &CacheSettings) -> Option<Arc<dyn Cache>> {
        if !settings.enabled {
            return None;
        }

        Some(Arc::new(InMemoryCache::with_config(InMemoryCacheConfig::from(
            settings,
        ))))
    }
}
