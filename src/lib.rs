//! Usage limiter
//!
//! Named, optionally plan-scoped quotas that subjects consume against:
//! - Limit definitions with exact `(name, plan)` identity and soft delete
//! - Per-subject remaining allowance with restore and reset
//! - Calendar reset schedules evaluated lazily in UTC
//! - Pluggable storage (in-memory, PostgreSQL) with compare-and-swap writes
//! - Optional advisory cache invalidated on every write

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::LimiterConfig;
pub use domain::{
    DomainError, LimitId, LimitRecord, NewLimit, ResetFrequency, SubjectId, UsageReport,
    DEFAULT_AMOUNT,
};
pub use infrastructure::limit::LimitRepository;
pub use infrastructure::usage::UsageTracker;

use tracing::info;

use infrastructure::cache::{AdvisoryCache, CacheFactory};
use infrastructure::storage::StorageFactory;

/// Create a tracker from configuration loaded from files and environment
pub async fn create_tracker() -> anyhow::Result<UsageTracker> {
    let config = LimiterConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    create_tracker_with_config(&config).await
}

/// Create a tracker wired to the configured storage backend and cache
pub async fn create_tracker_with_config(config: &LimiterConfig) -> anyhow::Result<UsageTracker> {
    info!("Storage backend: {}", config.storage.backend);

    let storage = StorageFactory::create(&config.storage)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage: {}", e))?;

    let cache = match CacheFactory::create(&config.cache) {
        Some(cache) => {
            info!(ttl_secs = config.cache.ttl_secs, "Limit cache enabled");
            AdvisoryCache::new(cache, config.cache.ttl())
        }
        None => AdvisoryCache::disabled(),
    };

    let limits = LimitRepository::from_config(storage, cache, config);
    Ok(UsageTracker::new(limits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tracker_with_default_config() {
        let tracker = create_tracker_with_config(&LimiterConfig::default())
            .await
            .unwrap();

        tracker
            .limits()
            .create(NewLimit::new("seats", 2.0))
            .await
            .unwrap();

        let remaining = tracker
            .consume(&SubjectId::new("u1"), "seats", None, DEFAULT_AMOUNT)
            .await
            .unwrap();
        assert_eq!(remaining, 1.0);
    }

    #[tokio::test]
    async fn test_create_tracker_rejects_unknown_backend() {
        let mut config = LimiterConfig::default();
        config.storage.backend = "sqlite".to_string();

        assert!(create_tracker_with_config(&config).await.is_err());
    }
}
