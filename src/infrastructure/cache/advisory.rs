//! Best-effort cache access for the limiter services

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::cache::{Cache, CacheExt};
use crate::domain::DomainError;

/// Optional cache whose failures never reach the caller.
///
/// A read error is a miss; a failed invalidation is logged and left to the
/// entry TTL.
///
/// Every invalidation bumps a generation counter. A fill after a miss is
/// dropped when any invalidation ran while the value was being loaded, so a
/// slow reader cannot put back a copy older than a committed write.
#[derive(Debug, Clone, Default)]
pub struct AdvisoryCache {
    inner: Option<Arc<dyn Cache>>,
    ttl: Duration,
    generation: Arc<Mutex<u64>>,
}

impl AdvisoryCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            inner: Some(cache),
            ttl,
            generation: Arc::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get<V>(&self, key: &str) -> Option<V>
    where
        V: DeserializeOwned + Send,
    {
        let cache = self.inner.as_ref()?;

        match cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to storage");
                None
            }
        }
    }

    /// Serves `key` from the cache, or loads it and fills the cache when no
    /// invalidation raced the load
    pub async fn get_or_load<V, F, Fut>(&self, key: &str, load: F) -> Result<Option<V>, DomainError>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, DomainError>>,
    {
        let Some(cache) = self.inner.as_ref() else {
            return load().await;
        };

        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }

        let seen = *self.generation.lock().await;
        let loaded = load().await?;

        if let Some(value) = &loaded {
            let generation = self.generation.lock().await;

            if *generation != seen {
                debug!(key, "Skipping cache fill raced by an invalidation");
            } else if let Err(e) = cache.set(key, value, self.ttl).await {
                warn!(key, error = %e, "Cache write failed");
            }
        }

        Ok(loaded)
    }

    pub async fn invalidate(&self, keys: &[String]) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };

        let mut generation = self.generation.lock().await;
        *generation += 1;

        for key in keys {
            if let Err(e) = cache.delete(key).await {
                warn!(key = %key, error = %e, "Cache invalidation failed");
            }
        }
    }

    pub async fn invalidate_pattern(&self, pattern: &str) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };

        let mut generation = self.generation.lock().await;
        *generation += 1;

        if let Err(e) = cache.delete_pattern(pattern).await {
            warn!(pattern, error = %e, "Cache pattern invalidation failed");
        }
    }
}
