//! Limit storage port

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::limit::{LimitId, LimitRecord};
use crate::domain::usage::{SubjectId, UsageState};
use crate::domain::DomainError;

/// Persistence for limits and usage states.
///
/// Every write is all-or-nothing. Writes that replace an existing row are
/// compare-and-swap on the row's `version`: a stale version fails with
/// [`DomainError::StorageConflict`] and leaves the row untouched. On success
/// the stored row carries `version + 1` and is returned.
#[async_trait]
pub trait LimitStorage: Send + Sync + Debug {
    /// Inserts a new limit.
    ///
    /// Fails with [`DomainError::AlreadyExists`] when a non-deleted limit with
    /// the same `(name, plan)` exists. The check and the insert are atomic.
    async fn insert_limit(&self, record: LimitRecord) -> Result<LimitRecord, DomainError>;

    /// Replaces a non-deleted limit whose stored version is `expected_version`
    async fn save_limit(
        &self,
        record: LimitRecord,
        expected_version: u64,
    ) -> Result<LimitRecord, DomainError>;

    /// Looks up a non-deleted limit. `plan = None` only matches unscoped limits.
    async fn load_limit_by_name_and_plan(
        &self,
        name: &str,
        plan: Option<&str>,
    ) -> Result<Option<LimitRecord>, DomainError>;

    /// Looks up a non-deleted limit by id
    async fn load_limit_by_id(&self, id: &LimitId) -> Result<Option<LimitRecord>, DomainError>;

    /// All non-deleted limits
    async fn list_limits(&self) -> Result<Vec<LimitRecord>, DomainError>;

    /// Marks a limit deleted. Returns false if it was absent or already deleted.
    async fn soft_delete_limit(&self, id: &LimitId, at: DateTime<Utc>)
        -> Result<bool, DomainError>;

    async fn load_usage_state(
        &self,
        subject_id: &SubjectId,
        limit_id: &LimitId,
    ) -> Result<Option<UsageState>, DomainError>;

    /// Writes a usage state.
    ///
    /// `expected_version = None` inserts and fails with a conflict if a state
    /// already exists for `(subject, limit)`; `Some(v)` is compare-and-swap.
    async fn save_usage_state(
        &self,
        state: UsageState,
        expected_version: Option<u64>,
    ) -> Result<UsageState, DomainError>;

    async fn list_usage_states_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<UsageState>, DomainError>;

    async fn list_usage_states_for_limit(
        &self,
        limit_id: &LimitId,
    ) -> Result<Vec<UsageState>, DomainError>;
}

/// Key used in conflict errors for a usage state
pub fn usage_state_key(subject_id: &SubjectId, limit_id: &LimitId) -> String {
    format!("usage:{}:{}", subject_id, limit_id)
}
