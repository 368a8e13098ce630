//! Limit definitions: validation, identity, persistence and caching

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::config::LimiterConfig;
use crate::domain::cache::LimitCacheKeys;
use crate::domain::limit::{normalize_plan, LimitId, LimitRecord, NewLimit, ValidatedLimit};
use crate::domain::storage::LimitStorage;
use crate::domain::usage::ConsumptionEngine;
use crate::domain::{Clock, DomainError, ResetFrequency, SystemClock};
use crate::infrastructure::cache::AdvisoryCache;
use crate::infrastructure::retry::{with_timeout, RetryPolicy};

/// Repository of limit definitions.
///
/// Reads of a single limit go through the cache when one is configured and
/// every write invalidates the keys it touched, so a fill that raced a write
/// is dropped. Allowance changes are
/// compare-and-swap writes retried under [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct LimitRepository {
    storage: Arc<dyn LimitStorage>,
    cache: AdvisoryCache,
    keys: LimitCacheKeys,
    clock: Arc<dyn Clock>,
    default_frequency: ResetFrequency,
    timeout: Duration,
    retry: RetryPolicy,
}

impl LimitRepository {
    pub fn new(storage: Arc<dyn LimitStorage>) -> Self {
        let config = LimiterConfig::default();

        Self {
            storage,
            cache: AdvisoryCache::disabled(),
            keys: LimitCacheKeys::default(),
            clock: Arc::new(SystemClock),
            default_frequency: config.defaults.reset_frequency,
            timeout: config.storage.timeout(),
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Builds a repository with every knob taken from `config`
    pub fn from_config(
        storage: Arc<dyn LimitStorage>,
        cache: AdvisoryCache,
        config: &LimiterConfig,
    ) -> Self {
        Self::new(storage)
            .with_cache(cache)
            .with_default_frequency(config.defaults.reset_frequency)
            .with_timeout(config.storage.timeout())
            .with_retry(RetryPolicy::from(&config.retry))
    }

    pub fn with_cache(mut self, cache: AdvisoryCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_frequency(mut self, frequency: ResetFrequency) -> Self {
        self.default_frequency = frequency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn storage(&self) -> &Arc<dyn LimitStorage> {
        &self.storage
    }

    pub(crate) fn cache(&self) -> &AdvisoryCache {
        &self.cache
    }

    pub(crate) fn keys(&self) -> &LimitCacheKeys {
        &self.keys
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validates `spec` and applies the configured default frequency when
    /// the request names none
    pub fn validate(&self, spec: &NewLimit) -> Result<ValidatedLimit, DomainError> {
        let mut validated = spec.validate()?;

        if validated.reset_frequency.is_none() && self.default_frequency.is_scheduled() {
            validated.reset_frequency = Some(self.default_frequency);
        }

        Ok(validated)
    }

    /// Strict creation; an existing live `(name, plan)` is `AlreadyExists`
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create(&self, spec: NewLimit) -> Result<LimitRecord, DomainError> {
        let validated = self.validate(&spec)?;
        let record = LimitRecord::new(validated, self.clock.now());

        let created = self.insert(record).await?;
        self.invalidate(&created).await;

        info!(id = %created.id(), plan = ?created.plan, "Limit created");
        Ok(created)
    }

    /// Returns the live record for the spec's `(name, plan)`, creating it if
    /// needed. Losing a creation race resolves to the winner's record.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn find_or_create(&self, spec: NewLimit) -> Result<LimitRecord, DomainError> {
        let validated = self.validate(&spec)?;
        let validated = &validated;
        let this = self;

        self.retry
            .run("find_or_create", move || async move {
                let plan = validated.plan.as_deref();

                if let Some(existing) = this.fetch_by_name(&validated.name, plan).await? {
                    return Ok(existing);
                }

                let record = LimitRecord::new(validated.clone(), this.clock.now());

                match this.insert(record).await {
                    Ok(created) => {
                        this.invalidate(&created).await;
                        info!(id = %created.id(), "Limit created");
                        Ok(created)
                    }
                    Err(DomainError::AlreadyExists { .. }) => {
                        debug!("Lost creation race, loading winner");
                        this.fetch_by_name(&validated.name, plan)
                            .await?
                            .ok_or_else(|| {
                                DomainError::storage_conflict(this.keys.by_name(&validated.name, plan))
                            })
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Exact `(name, plan)` lookup; `None` and blank plans match only
    /// unscoped records
    pub async fn find_by_name(
        &self,
        name: &str,
        plan: Option<&str>,
    ) -> Result<LimitRecord, DomainError> {
        let name = name.trim();
        let plan = normalize_plan(plan);
        let plan = plan.as_deref();
        let key = self.keys.by_name(name, plan);

        self.cache
            .get_or_load(&key, || self.fetch_by_name(name, plan))
            .await?
            .ok_or_else(|| DomainError::not_found(name, plan))
    }

    pub async fn find_by_id(&self, id: &LimitId) -> Result<LimitRecord, DomainError> {
        let key = self.keys.by_id(id);

        self.cache
            .get_or_load(&key, || self.fetch_by_id(id))
            .await?
            .ok_or_else(|| DomainError::not_found_by_id(id))
    }

    /// Live limits ordered by name, then plan
    pub async fn list(&self) -> Result<Vec<LimitRecord>, DomainError> {
        let mut limits =
            with_timeout(self.timeout, "list_limits", self.storage.list_limits()).await?;

        limits.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.plan.cmp(&b.plan)));
        Ok(limits)
    }

    /// Soft-deletes a limit. Returns `false` if it was already gone.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &LimitId) -> Result<bool, DomainError> {
        let Some(record) = self.fetch_by_id(id).await? else {
            return Ok(false);
        };

        let this = self;
        let deleted = self
            .retry
            .run("soft_delete_limit", move || async move {
                let at = this.clock.now();
                with_timeout(
                    this.timeout,
                    "soft_delete_limit",
                    this.storage.soft_delete_limit(id, at),
                )
                .await
            })
            .await?;

        self.invalidate(&record).await;
        self.cache
            .invalidate_pattern(&self.keys.usage_pattern(id))
            .await;

        if deleted {
            info!(name = %record.name, plan = ?record.plan, "Limit deleted");
        }

        Ok(deleted)
    }

    /// Raises the ceiling of a limit by `amount`
    #[instrument(skip(self))]
    pub async fn increment(&self, id: &LimitId, amount: f64) -> Result<LimitRecord, DomainError> {
        self.update_allowance(id, "increment_allowance", |record| {
            ConsumptionEngine::increment_allowance(record, amount)
        })
        .await
    }

    /// Lowers the ceiling of a limit by `amount`; never below zero
    #[instrument(skip(self))]
    pub async fn decrement(&self, id: &LimitId, amount: f64) -> Result<LimitRecord, DomainError> {
        self.update_allowance(id, "decrement_allowance", |record| {
            ConsumptionEngine::decrement_allowance(record, amount)
        })
        .await
    }

    async fn update_allowance<F>(
        &self,
        id: &LimitId,
        operation: &'static str,
        apply: F,
    ) -> Result<LimitRecord, DomainError>
    where
        F: Fn(&LimitRecord) -> Result<LimitRecord, DomainError>,
    {
        let apply = &apply;
        let this = self;

        let updated = self
            .retry
            .run(operation, move || async move {
                let current = this
                    .fetch_by_id(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found_by_id(id))?;

                let mut next = apply(&current)?;
                next.touch(this.clock.now());

                with_timeout(
                    this.timeout,
                    "save_limit",
                    this.storage.save_limit(next, current.version),
                )
                .await
            })
            .await?;

        self.invalidate(&updated).await;
        self.cache
            .invalidate_pattern(&self.keys.usage_pattern(id))
            .await;

        debug!(
            name = %updated.name,
            allowed_amount = updated.allowed_amount,
            "Allowance updated"
        );
        Ok(updated)
    }

    /// Storage-only lookup used on write paths
    pub(crate) async fn fetch_by_name(
        &self,
        name: &str,
        plan: Option<&str>,
    ) -> Result<Option<LimitRecord>, DomainError> {
        with_timeout(
            self.timeout,
            "load_limit_by_name_and_plan",
            self.storage.load_limit_by_name_and_plan(name, plan),
        )
        .await
    }

    pub(crate) async fn fetch_by_id(&self, id: &LimitId) -> Result<Option<LimitRecord>, DomainError> {
        with_timeout(self.timeout, "load_limit_by_id", self.storage.load_limit_by_id(id)).await
    }

    async fn insert(&self, record: LimitRecord) -> Result<LimitRecord, DomainError> {
        with_timeout(self.timeout, "insert_limit", self.storage.insert_limit(record)).await
    }

    async fn invalidate(&self, record: &LimitRecord) {
        self.cache
            .invalidate(&[
                self.keys.by_name(&record.name, record.plan()),
                self.keys.by_id(record.id()),
            ])
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::cache::MockCache;
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::storage::InMemoryLimitStorage;

    fn repository() -> LimitRepository {
        LimitRepository::new(Arc::new(InMemoryLimitStorage::new()))
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let repo = repository();
        let spec = NewLimit::new("locations", 5.0).with_plan("standard");

        let first = repo.find_or_create(spec.clone()).await.unwrap();
        let second = repo.find_or_create(spec).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name_and_plan() {
        let repo = repository();
        let spec = NewLimit::new("locations", 5.0).with_plan("standard");

        repo.create(spec.clone()).await.unwrap();

        let err = repo.create(spec.clone()).await.unwrap_err();
        assert_eq!(err, DomainError::already_exists("locations", Some("standard")));

        assert!(repo.find_or_create(spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_find_or_create_yields_one_record() {
        let repo = repository();
        let spec = NewLimit::new("seats", 3.0);

        let results = futures::future::join_all(
            (0..8).map(|_| repo.find_or_create(spec.clone())),
        )
        .await;

        let ids: Vec<_> = results.into_iter().map(|r| *r.unwrap().id()).collect();
        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_name_is_plan_scoped() {
        let repo = repository();
        let unscoped = repo.create(NewLimit::new("x", 1.0)).await.unwrap();
        let pro = repo.create(NewLimit::new("x", 2.0).with_plan("pro")).await.unwrap();

        let found = repo.find_by_name("x", None).await.unwrap();
        assert_eq!(found.id(), unscoped.id());

        let found = repo.find_by_name("x", Some("pro")).await.unwrap();
        assert_eq!(found.id(), pro.id());
        assert_ne!(unscoped.id(), pro.id());

        let found = repo.find_by_name("x", Some("  ")).await.unwrap();
        assert_eq!(found.id(), unscoped.id());

        let err = repo.find_by_name("x", Some("enterprise")).await.unwrap_err();
        assert_eq!(err, DomainError::not_found("x", Some("enterprise")));
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let repo = repository();
        let err = repo.find_by_id(&LimitId::generate()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFoundById { .. }));
    }

    #[tokio::test]
    async fn test_blank_plan_is_stored_as_none() {
        let repo = repository();
        let created = repo.create(NewLimit::new("x", 1.0).with_plan("")).await.unwrap();
        assert_eq!(created.plan, None);
    }

    #[tokio::test]
    async fn test_validation_errors_surface_before_storage() {
        let repo = repository();

        let err = repo.create(NewLimit::new("", 1.0)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));

        let err = repo.create(NewLimit::new("x", -1.0)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));

        let err = repo
            .create(NewLimit::new("x", 1.0).with_reset_frequency("every fortnight"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));

        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_frequency_applies_only_when_unspecified() {
        let repo = repository().with_default_frequency(ResetFrequency::EveryMonth);

        let defaulted = repo.create(NewLimit::new("a", 1.0)).await.unwrap();
        assert_eq!(defaulted.reset_frequency, Some(ResetFrequency::EveryMonth));

        let explicit = repo
            .create(NewLimit::new("b", 1.0).with_reset_frequency("every day"))
            .await
            .unwrap();
        assert_eq!(explicit.reset_frequency, Some(ResetFrequency::EveryDay));

        let unset = repository().create(NewLimit::new("c", 1.0)).await.unwrap();
        assert_eq!(unset.reset_frequency, None);
    }

    #[tokio::test]
    async fn test_decrement_below_zero_leaves_record_untouched() {
        let repo = repository();
        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();

        let err = repo.decrement(record.id(), 6.0).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));

        let current = repo.find_by_id(record.id()).await.unwrap();
        assert_eq!(current.allowed_amount, 5.0);
        assert_eq!(current.version, record.version);
    }

    #[tokio::test]
    async fn test_increment_and_decrement_persist() {
        let repo = repository();
        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();

        let raised = repo.increment(record.id(), 2.5).await.unwrap();
        assert_eq!(raised.allowed_amount, 7.5);

        let lowered = repo.decrement(record.id(), 7.5).await.unwrap();
        assert_eq!(lowered.allowed_amount, 0.0);

        let err = repo.increment(record.id(), 0.0).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_delete_hides_limit_and_frees_identity() {
        let repo = repository();
        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();

        assert!(repo.delete(record.id()).await.unwrap());
        assert!(!repo.delete(record.id()).await.unwrap());

        assert!(matches!(
            repo.find_by_name("seats", None).await,
            Err(DomainError::NotFound { .. })
        ));

        let recreated = repo.create(NewLimit::new("seats", 1.0)).await.unwrap();
        assert_ne!(recreated.id(), record.id());
    }

    #[tokio::test]
    async fn test_writes_invalidate_cached_keys() {
        let mut mock = MockCache::new();
        mock.expect_get_raw().returning(|_| Ok(None));
        mock.expect_set_raw().returning(|_, _, _| Ok(()));
        mock.expect_delete()
            .withf(|key| key == "limiter:limit:name:seats")
            .times(2)
            .returning(|_| Ok(true));
        mock.expect_delete()
            .withf(|key| key.starts_with("limiter:limit:id:"))
            .times(2)
            .returning(|_| Ok(true));
        mock.expect_delete_pattern()
            .withf(|pattern| pattern.starts_with("limiter:usage:*:limit="))
            .times(1)
            .returning(|_| Ok(0));

        let repo = repository().with_cache(AdvisoryCache::new(
            Arc::new(mock),
            Duration::from_secs(60),
        ));

        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();
        repo.increment(record.id(), 1.0).await.unwrap();
    }

    fn cached_repository() -> LimitRepository {
        repository().with_cache(AdvisoryCache::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn test_cached_lookup_keeps_unscoped_and_dash_plan_apart() {
        let repo = cached_repository();
        let unscoped = repo.create(NewLimit::new("x", 1.0)).await.unwrap();
        let dash = repo.create(NewLimit::new("x", 9.0).with_plan("-")).await.unwrap();

        let found = repo.find_by_name("x", None).await.unwrap();
        assert_eq!(found.id(), unscoped.id());

        let found = repo.find_by_name("x", Some("-")).await.unwrap();
        assert_eq!(found.id(), dash.id());
        assert_eq!(found.allowed_amount, 9.0);

        let found = repo.find_by_name("x", None).await.unwrap();
        assert_eq!(found.allowed_amount, 1.0);
    }

    #[tokio::test]
    async fn test_cached_record_is_dropped_on_delete() {
        let repo = cached_repository();
        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();

        repo.find_by_name("seats", None).await.unwrap();
        repo.find_by_id(record.id()).await.unwrap();
        assert!(repo.delete(record.id()).await.unwrap());

        assert!(matches!(
            repo.find_by_name("seats", None).await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            repo.find_by_id(record.id()).await,
            Err(DomainError::NotFoundById { .. })
        ));
    }

    #[tokio::test]
    async fn test_cached_record_follows_allowance_changes() {
        let repo = cached_repository();
        let record = repo.create(NewLimit::new("seats", 5.0)).await.unwrap();

        assert_eq!(repo.find_by_id(record.id()).await.unwrap().allowed_amount, 5.0);
        repo.increment(record.id(), 2.0).await.unwrap();
        assert_eq!(repo.find_by_id(record.id()).await.unwrap().allowed_amount, 7.0);

        assert_eq!(repo.find_by_name("seats", None).await.unwrap().allowed_amount, 7.0);
        repo.decrement(record.id(), 3.0).await.unwrap();
        assert_eq!(repo.find_by_name("seats", None).await.unwrap().allowed_amount, 4.0);
    }
}
