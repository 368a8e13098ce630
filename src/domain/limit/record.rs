//! Limit entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ResetFrequency;
use crate::domain::DomainError;

/// Limit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitId(Uuid);

impl LimitId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse an identifier from its textual form
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| DomainError::invalid_argument(format!("Invalid limit id '{}'", raw)))
    }
}

impl From<Uuid> for LimitId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for LimitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creation request for a limit.
///
/// Holds raw caller input; [`NewLimit::validate`] turns it into a
/// [`ValidatedLimit`] that can be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLimit {
    pub name: String,
    #[serde(default)]
    pub plan: Option<String>,
    pub allowed_amount: f64,
    #[serde(default)]
    pub reset_frequency: Option<String>,
}

impl NewLimit {
    pub fn new(name: impl Into<String>, allowed_amount: f64) -> Self {
        Self {
            name: name.into(),
            plan: None,
            allowed_amount,
            reset_frequency: None,
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_reset_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.reset_frequency = Some(frequency.into());
        self
    }

    /// Checks the request and normalizes a blank plan to `None`
    pub fn validate(&self) -> Result<ValidatedLimit, DomainError> {
        let name = self.name.trim();

        if name.is_empty() {
            return Err(DomainError::invalid_argument("\"name\" is required"));
        }

        if !self.allowed_amount.is_finite() || self.allowed_amount < 0.0 {
            return Err(DomainError::invalid_argument(
                "\"allowed_amount\" should be a number greater than or equal to 0",
            ));
        }

        let reset_frequency = ResetFrequency::parse_optional(self.reset_frequency.as_deref())?;

        Ok(ValidatedLimit {
            name: name.to_string(),
            plan: normalize_plan(self.plan.as_deref()),
            allowed_amount: self.allowed_amount,
            reset_frequency,
        })
    }
}

/// A creation request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLimit {
    pub name: String,
    pub plan: Option<String>,
    pub allowed_amount: f64,
    pub reset_frequency: Option<ResetFrequency>,
}

/// Blank plans are the unscoped plan
pub fn normalize_plan(plan: Option<&str>) -> Option<String> {
    plan.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// A quota definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRecord {
    id: LimitId,
    pub name: String,
    pub plan: Option<String>,
    pub allowed_amount: f64,
    pub reset_frequency: Option<ResetFrequency>,
    /// Optimistic concurrency token, bumped by storage on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LimitRecord {
    /// Build a record from a validated request
    pub fn new(spec: ValidatedLimit, now: DateTime<Utc>) -> Self {
        Self {
            id: LimitId::generate(),
            name: spec.name,
            plan: spec.plan,
            allowed_amount: spec.allowed_amount,
            reset_frequency: spec.reset_frequency,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn id(&self) -> &LimitId {
        &self.id
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this record answers to `(name, plan)`; plan match is exact
    pub fn matches(&self, name: &str, plan: Option<&str>) -> bool {
        self.name == name && self.plan.as_deref() == plan
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
