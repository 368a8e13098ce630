//! Per-subject usage state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::limit::{LimitId, LimitRecord};

/// Reference to the entity consuming a limit (a user, a tenant, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for SubjectId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remaining allowance of one subject against one limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageState {
    pub subject_id: SubjectId,
    pub limit_id: LimitId,
    pub remaining_amount: f64,
    pub last_reset_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by storage on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageState {
    /// A fresh state holding the full allowance
    pub fn fresh(subject_id: SubjectId, record: &LimitRecord, now: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            limit_id: *record.id(),
            remaining_amount: record.allowed_amount,
            last_reset_at: now,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount consumed relative to the given ceiling
    pub fn used_amount(&self, record: &LimitRecord) -> f64 {
        (record.allowed_amount - self.remaining_amount).max(0.0)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
