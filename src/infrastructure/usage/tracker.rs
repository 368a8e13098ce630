//! Per-subject consumption against limits

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::domain::limit::{normalize_plan, LimitId, LimitRecord};
use crate::domain::storage::usage_state_key;
use crate::domain::usage::{ConsumptionEngine, SubjectId, UsageReport, UsageState};
use crate::domain::{DomainError, ResetScheduler};
use crate::infrastructure::limit::LimitRepository;
use crate::infrastructure::retry::with_timeout;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Orchestrates usage of limits by subjects.
///
/// Every state change is a read-modify-write of one `UsageState`:
/// load, reconcile against the current ceiling, apply a due reset, apply the
/// transition, then compare-and-swap. Writers of the same
/// `(subject, limit)` pair are serialized in-process by a keyed async lock;
/// the storage CAS covers writers in other processes, and conflicts are
/// retried with backoff.
///
/// Resets are lazy: a due reset is applied when the state is next touched
/// or read, or by an explicit [`UsageTracker::reset_due`] sweep.
#[derive(Debug)]
pub struct UsageTracker {
    limits: LimitRepository,
    locks: Mutex<HashMap<String, KeyLock>>,
}

impl UsageTracker {
    pub fn new(limits: LimitRepository) -> Self {
        Self {
            limits,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &LimitRepository {
        &self.limits
    }

    /// Consumes `amount` and returns what remains.
    ///
    /// Fails with `Exhausted` when the remaining amount is insufficient; the
    /// stored state is then unchanged.
    #[instrument(skip(self, subject), fields(subject = %subject))]
    pub async fn consume(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
        amount: f64,
    ) -> Result<f64, DomainError> {
        let record = self.resolve(name, plan).await?;

        let state = self
            .modify(subject, &record, "consume", |state, record, _| {
                ConsumptionEngine::consume(state, record, amount)
            })
            .await
            .inspect_err(|e| {
                if e.is_exhausted() {
                    debug!(name = %record.name, "Limit exhausted");
                }
            })?;

        Ok(ConsumptionEngine::remaining(&state))
    }

    /// Gives `amount` back to the subject, capped at the ceiling
    #[instrument(skip(self, subject), fields(subject = %subject))]
    pub async fn restore(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
        amount: f64,
    ) -> Result<f64, DomainError> {
        let record = self.resolve(name, plan).await?;

        let state = self
            .modify(subject, &record, "restore", |state, record, _| {
                ConsumptionEngine::restore(state, record, amount)
            })
            .await?;

        Ok(ConsumptionEngine::remaining(&state))
    }

    /// Restores the full allowance regardless of schedule
    #[instrument(skip(self, subject), fields(subject = %subject))]
    pub async fn reset_now(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
    ) -> Result<f64, DomainError> {
        let record = self.resolve(name, plan).await?;

        let state = self
            .modify(subject, &record, "reset", |state, record, now| {
                Ok(ConsumptionEngine::reset(state, record, now))
            })
            .await?;

        info!(name = %record.name, "Usage reset");
        Ok(ConsumptionEngine::remaining(&state))
    }

    /// Raises the limit's ceiling; subject states are untouched
    pub async fn increment(
        &self,
        name: &str,
        plan: Option<&str>,
        amount: f64,
    ) -> Result<LimitRecord, DomainError> {
        let record = self.resolve(name, plan).await?;
        self.limits.increment(record.id(), amount).await
    }

    /// Lowers the limit's ceiling; subject states are clamped when next read
    pub async fn decrement(
        &self,
        name: &str,
        plan: Option<&str>,
        amount: f64,
    ) -> Result<LimitRecord, DomainError> {
        let record = self.resolve(name, plan).await?;
        self.limits.decrement(record.id(), amount).await
    }

    /// Starts tracking a subject that has already used `used_amount`
    #[instrument(skip(self, subject), fields(subject = %subject))]
    pub async fn attach(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
        used_amount: f64,
    ) -> Result<UsageState, DomainError> {
        let record = self.resolve(name, plan).await?;

        if !used_amount.is_finite() || used_amount < 0.0 || used_amount > record.allowed_amount {
            return Err(DomainError::invalid_argument(format!(
                "\"used_amount\" should be between 0 and {}",
                record.allowed_amount
            )));
        }

        let key = usage_state_key(subject, record.id());
        let record = &record;
        let this = self;

        let state = self
            .serialized(&key, || {
                this.limits.retry().run("attach", move || async move {
                    if this.load(subject, record.id()).await?.is_some() {
                        return Err(DomainError::invalid_argument(format!(
                            "Subject '{}' already uses limit '{}'",
                            subject, record.name
                        )));
                    }

                    let mut state = UsageState::fresh(subject.clone(), record, this.now());
                    state.remaining_amount = record.allowed_amount - used_amount;

                    this.save(state, None).await
                })
            })
            .await?;

        self.invalidate(subject, record.id()).await;
        Ok(state)
    }

    /// Whether `amount` could be consumed right now
    pub async fn has_enough(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
        amount: f64,
    ) -> Result<bool, DomainError> {
        let record = self.limits.find_by_name(name, plan).await?;
        let state = self.view(subject, &record).await?;

        ConsumptionEngine::can_consume(&state, amount)
    }

    pub async fn remaining(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
    ) -> Result<f64, DomainError> {
        let record = self.limits.find_by_name(name, plan).await?;
        let state = self.view(subject, &record).await?;

        Ok(ConsumptionEngine::remaining(&state))
    }

    pub async fn used(
        &self,
        subject: &SubjectId,
        name: &str,
        plan: Option<&str>,
    ) -> Result<f64, DomainError> {
        let record = self.limits.find_by_name(name, plan).await?;
        let state = self.view(subject, &record).await?;

        Ok(state.used_amount(&record))
    }

    /// One row per live limit the subject has state for, ordered by name
    /// then plan
    pub async fn usage_report(&self, subject: &SubjectId) -> Result<Vec<UsageReport>, DomainError> {
        let states = with_timeout(
            self.limits.timeout(),
            "list_usage_states_for_subject",
            self.limits.storage().list_usage_states_for_subject(subject),
        )
        .await?;

        let records = try_join_all(
            states
                .iter()
                .map(|state| self.limits.fetch_by_id(&state.limit_id)),
        )
        .await?;

        let now = self.now();
        let mut rows: Vec<UsageReport> = states
            .iter()
            .zip(records)
            .filter_map(|(state, record)| record.map(|record| (state, record)))
            .map(|(state, record)| UsageReport::new(&record, &settle(state, &record, now)))
            .collect();

        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.plan.cmp(&b.plan)));
        Ok(rows)
    }

    /// Persists every reset that is due at `now`. Returns how many states
    /// were reset.
    #[instrument(skip(self))]
    pub async fn reset_due(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let mut reset = 0;

        for record in self.limits.list().await? {
            if !record.reset_frequency.is_some_and(|f| f.is_scheduled()) {
                continue;
            }

            let states = with_timeout(
                self.limits.timeout(),
                "list_usage_states_for_limit",
                self.limits.storage().list_usage_states_for_limit(record.id()),
            )
            .await?;

            for state in states {
                if !ResetScheduler::is_due(state.last_reset_at, record.reset_frequency, now) {
                    continue;
                }

                let key = usage_state_key(&state.subject_id, record.id());
                let subject = &state.subject_id;
                let record = &record;
                let this = self;

                let applied = self
                    .serialized(&key, || {
                        this.limits.retry().run("reset_due", move || async move {
                            let Some(current) = this.load(subject, record.id()).await? else {
                                return Ok(false);
                            };

                            if !ResetScheduler::is_due(
                                current.last_reset_at,
                                record.reset_frequency,
                                now,
                            ) {
                                return Ok(false);
                            }

                            let mut next = ConsumptionEngine::reset(&current, record, now);
                            next.touch(now);
                            this.save(next, Some(current.version)).await?;
                            Ok(true)
                        })
                    })
                    .await?;

                if applied {
                    self.invalidate(subject, record.id()).await;
                    reset += 1;
                }
            }
        }

        if reset > 0 {
            info!(count = reset, "Applied due resets");
        }

        Ok(reset)
    }

    async fn resolve(&self, name: &str, plan: Option<&str>) -> Result<LimitRecord, DomainError> {
        let name = name.trim();
        let plan = normalize_plan(plan);
        let plan = plan.as_deref();

        self.limits
            .fetch_by_name(name, plan)
            .await?
            .ok_or_else(|| DomainError::not_found(name, plan))
    }

    /// Runs one serialized, retried read-modify-write of a usage state
    async fn modify<F>(
        &self,
        subject: &SubjectId,
        record: &LimitRecord,
        operation: &'static str,
        apply: F,
    ) -> Result<UsageState, DomainError>
    where
        F: Fn(&UsageState, &LimitRecord, DateTime<Utc>) -> Result<UsageState, DomainError>,
    {
        let key = usage_state_key(subject, record.id());
        let apply = &apply;
        let this = self;

        let state = self
            .serialized(&key, || {
                this.limits.retry().run(operation, move || async move {
                    let now = this.now();
                    let stored = this.load(subject, record.id()).await?;
                    let expected_version = stored.as_ref().map(|s| s.version);

                    let current = match stored {
                        Some(state) => settle(&state, record, now),
                        None => UsageState::fresh(subject.clone(), record, now),
                    };

                    let mut next = apply(&current, record, now)?;
                    next.touch(now);

                    this.save(next, expected_version).await
                })
            })
            .await?;

        self.invalidate(subject, record.id()).await;
        Ok(state)
    }

    /// Current state as a reader would see it; nothing is persisted
    async fn view(&self, subject: &SubjectId, record: &LimitRecord) -> Result<UsageState, DomainError> {
        let now = self.now();
        let key = self.limits.keys().usage(subject, record.id());

        let stored = self
            .limits
            .cache()
            .get_or_load(&key, || self.load(subject, record.id()))
            .await?;

        Ok(match stored {
            Some(state) => settle(&state, record, now),
            None => UsageState::fresh(subject.clone(), record, now),
        })
    }

    async fn load(
        &self,
        subject: &SubjectId,
        limit_id: &LimitId,
    ) -> Result<Option<UsageState>, DomainError> {
        with_timeout(
            self.limits.timeout(),
            "load_usage_state",
            self.limits.storage().load_usage_state(subject, limit_id),
        )
        .await
    }

    async fn save(
        &self,
        state: UsageState,
        expected_version: Option<u64>,
    ) -> Result<UsageState, DomainError> {
        with_timeout(
            self.limits.timeout(),
            "save_usage_state",
            self.limits.storage().save_usage_state(state, expected_version),
        )
        .await
    }

    async fn invalidate(&self, subject: &SubjectId, limit_id: &LimitId) {
        self.limits
            .cache()
            .invalidate(&[self.limits.keys().usage(subject, limit_id)])
            .await;
    }

    fn now(&self) -> DateTime<Utc> {
        self.limits.clock().now()
    }

    async fn serialized<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let lock = self.lock_for(key)?;

        let result = {
            let _guard = lock.lock().await;
            operation().await
        };

        drop(lock);
        self.release(key);
        result
    }

    fn lock_for(&self, key: &str) -> Result<KeyLock, DomainError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| DomainError::internal(format!("Failed to acquire lock map: {}", e)))?;

        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Drops the key's lock once no task holds or waits on it
    fn release(&self, key: &str) {
        match self.locks.lock() {
            Ok(mut locks) => {
                if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                    locks.remove(key);
                }
            }
            Err(e) => warn!(error = %e, "Lock map poisoned"),
        }
    }
}

/// Brings a stored state in line with the current record: clamps it into
/// `[0, allowed_amount]`, then applies a reset if one is due
fn settle(state: &UsageState, record: &LimitRecord, now: DateTime<Utc>) -> UsageState {
    let state = ConsumptionEngine::reconcile(state, record);

    if ResetScheduler::is_due(state.last_reset_at, record.reset_frequency, now) {
        ConsumptionEngine::reset(&state, record, now)
    } else {
        state
    }
}
