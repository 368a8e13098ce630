//! In-memory limit storage

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::TableNames;
use crate::domain::limit::{LimitId, LimitRecord};
use crate::domain::storage::{usage_state_key, LimitStorage};
use crate::domain::usage::{SubjectId, UsageState};
use crate::domain::DomainError;

#[derive(Debug, Default)]
struct Tables {
    limits: HashMap<LimitId, LimitRecord>,
    usage_states: HashMap<(SubjectId, LimitId), UsageState>,
}

/// Thread-safe in-memory storage implementation
///
/// Useful for testing and single-process hosts. Data is lost when the
/// process terminates. Both tables sit behind one lock, so every
/// check-then-write is atomic.
#[derive(Debug)]
pub struct InMemoryLimitStorage {
    tables: RwLock<Tables>,
    names: TableNames,
}

impl Default for InMemoryLimitStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLimitStorage {
    /// Creates a new empty in-memory storage
    pub fn new() -> Self {
        Self::with_table_names(TableNames::default())
    }

    /// Creates storage whose error messages use the given table names
    pub fn with_table_names(names: TableNames) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            names,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, DomainError> {
        self.tables
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, DomainError> {
        self.tables
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }

    fn limit_key(&self, id: &LimitId) -> String {
        format!("{}:{}", self.names.limits, id)
    }

    fn usage_key(&self, state: &UsageState) -> String {
        format!(
            "{}:{}",
            self.names.usage_states,
            usage_state_key(&state.subject_id, &state.limit_id)
        )
    }
}

#[async_trait]
impl LimitStorage for InMemoryLimitStorage {
    async fn insert_limit(&self, mut record: LimitRecord) -> Result<LimitRecord, DomainError> {
        let mut tables = self.write()?;

        let taken = tables
            .limits
            .values()
            .any(|l| !l.is_deleted() && l.matches(&record.name, record.plan()));

        if taken {
            return Err(DomainError::already_exists(&record.name, record.plan()));
        }

        record.version = 1;
        tables.limits.insert(*record.id(), record.clone());
        Ok(record)
    }

    async fn save_limit(
        &self,
        mut record: LimitRecord,
        expected_version: u64,
    ) -> Result<LimitRecord, DomainError> {
        let mut tables = self.write()?;

        let current = tables
            .limits
            .get(record.id())
            .filter(|l| !l.is_deleted())
            .ok_or_else(|| DomainError::not_found_by_id(record.id()))?;

        if current.version != expected_version {
            return Err(DomainError::storage_conflict(self.limit_key(record.id())));
        }

        record.version = expected_version + 1;
        tables.limits.insert(*record.id(), record.clone());
        Ok(record)
    }

    async fn load_limit_by_name_and_plan(
        &self,
        name: &str,
        plan: Option<&str>,
    ) -> Result<Option<LimitRecord>, DomainError> {
        let tables = self.read()?;

        Ok(tables
            .limits
            .values()
            .find(|l| !l.is_deleted() && l.matches(name, plan))
            .cloned())
    }

    async fn load_limit_by_id(&self, id: &LimitId) -> Result<Option<LimitRecord>, DomainError> {
        let tables = self.read()?;

        Ok(tables.limits.get(id).filter(|l| !l.is_deleted()).cloned())
    }

    async fn list_limits(&self) -> Result<Vec<LimitRecord>, DomainError> {
        let tables = self.read()?;

        let mut limits: Vec<_> = tables
            .limits
            .values()
            .filter(|l| !l.is_deleted())
            .cloned()
            .collect();

        limits.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.plan.cmp(&b.plan)));
        Ok(limits)
    }

    async fn soft_delete_limit(
        &self,
        id: &LimitId,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut tables = self.write()?;

        match tables.limits.get_mut(id) {
            Some(limit) if !limit.is_deleted() => {
                limit.deleted_at = Some(at);
                limit.updated_at = at;
                limit.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load_usage_state(
        &self,
        subject_id: &SubjectId,
        limit_id: &LimitId,
    ) -> Result<Option<UsageState>, DomainError> {
        let tables = self.read()?;

        Ok(tables
            .usage_states
            .get(&(subject_id.clone(), *limit_id))
            .cloned())
    }

    async fn save_usage_state(
        &self,
        mut state: UsageState,
        expected_version: Option<u64>,
    ) -> Result<UsageState, DomainError> {
        let mut tables = self.write()?;
        let key = (state.subject_id.clone(), state.limit_id);
        let current_version = tables.usage_states.get(&key).map(|s| s.version);

        if current_version != expected_version {
            return Err(DomainError::storage_conflict(self.usage_key(&state)));
        }

        state.version = expected_version.unwrap_or(0) + 1;
        tables.usage_states.insert(key, state.clone());
        Ok(state)
    }

    async fn list_usage_states_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<UsageState>, DomainError> {
        let tables = self.read()?;

        Ok(tables
            .usage_states
            .values()
            .filter(|s| &s.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn list_usage_states_for_limit(
        &self,
        limit_id: &LimitId,
    ) -> Result<Vec<UsageState>, DomainError> {
        let tables = self.read()?;

        let mut states: Vec<_> = tables
            .usage_states
            .values()
            .filter(|s| &s.limit_id == limit_id)
            .cloned()
            .collect();

        states.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        Ok(states)
    }
}
