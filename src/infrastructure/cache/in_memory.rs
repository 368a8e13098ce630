//! In-memory cache implementation using moka

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;

use crate::config::CacheSettings;
use crate::domain::cache::Cache;
use crate::domain::DomainError;

/// Configuration for in-memory cache
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Upper bound on any entry's lifetime
    pub default_ttl: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for InMemoryCacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            max_capacity: settings.max_capacity,
            default_ttl: settings.ttl(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Serialized JSON value
    data: String,
    /// Expiration timestamp (millis since epoch)
    expires_at: u64,
}

/// Thread-safe in-memory cache backed by moka.
///
/// Entries carry their own TTL on top of the cache-wide bound, so a short
/// per-entry TTL wins over `default_ttl`.
#[derive(Debug)]
pub struct InMemoryCache {
    cache: MokaCache<String, CacheEntry>,
    config: InMemoryCacheConfig,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl)
            .build();

        Self { cache, config }
    }

    pub fn config(&self) -> &InMemoryCacheConfig {
        &self.config
    }

    fn current_time_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn is_expired(entry: &CacheEntry) -> bool {
        Self::current_time_millis() > entry.expires_at
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles a `*` glob into an anchored regex; everything else is literal
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, DomainError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    regex::Regex::new(&format!("^{}$", body))
        .map_err(|e| DomainError::cache(format!("Invalid pattern: {}", e)))
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        match self.cache.get(key).await {
            Some(entry) if Self::is_expired(&entry) => {
                self.cache.remove(key).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data)),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        let entry = CacheEntry {
            data: value.to_string(),
            expires_at: Self::current_time_millis() + ttl.as_millis() as u64,
        };

        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, DomainError> {
        let regex = glob_to_regex(pattern)?;

        self.cache.run_pending_tasks().await;

        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| regex.is_match(k.as_str()))
            .map(|(k, _)| k.to_string())
            .collect();

        let mut deleted = 0;
        for key in keys {
            if self.cache.remove(&key).await.is_some() {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CacheExt;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = InMemoryCache::new();

        cache.set("key1", &2.5f64, Duration::from_secs(60)).await.unwrap();

        let result: Option<f64> = cache.get("key1").await.unwrap();
        assert_eq!(result, Some(2.5));

        let missing: Option<f64> = cache.get("missing").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryCache::new();

        cache.set("key1", &"value1", Duration::from_secs(60)).await.unwrap();

        assert!(cache.delete("key1").await.unwrap());
        assert!(!cache.delete("key1").await.unwrap());

        let result: Option<String> = cache.get("key1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_per_entry_ttl_expiration() {
        let cache = InMemoryCache::new();

        cache.set("key1", &"value1", Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result: Option<String> = cache.get("key1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_pattern_treats_only_star_as_wildcard() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);

        cache.set("limiter:usage:u1:limit=a", &1, ttl).await.unwrap();
        cache.set("limiter:usage:u2:limit=a", &2, ttl).await.unwrap();
        cache.set("limiter:usage:u1:limit=b", &3, ttl).await.unwrap();
        cache.set("limiter:usage:u1:limit=ab", &4, ttl).await.unwrap();

        let deleted = cache
            .delete_pattern("limiter:usage:*:limit=a")
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let gone: Option<i32> = cache.get("limiter:usage:u2:limit=a").await.unwrap();
        assert!(gone.is_none());

        let other_limit: Option<i32> = cache.get("limiter:usage:u1:limit=b").await.unwrap();
        assert_eq!(other_limit, Some(3));

        let kept: Option<i32> = cache.get("limiter:usage:u1:limit=ab").await.unwrap();
        assert_eq!(kept, Some(4));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let regex = glob_to_regex("plan=(pro)+*").unwrap();

        assert!(regex.is_match("plan=(pro)+:x"));
        assert!(!regex.is_match("plan=proo:x"));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = CacheSettings {
            enabled: true,
            max_capacity: 100,
            ttl_secs: 30,
        };

        let cache = InMemoryCache::with_config(InMemoryCacheConfig::from(&settings));

        assert_eq!(cache.config().max_capacity, 100);
        assert_eq!(cache.config().default_ttl, Duration::from_secs(30));
    }
}
