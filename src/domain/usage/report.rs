//! Read model summarizing a subject's usage

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::UsageState;
use crate::domain::limit::{LimitId, LimitRecord, ResetFrequency};
use crate::domain::schedule::ResetScheduler;

/// One row of a subject's usage report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub limit_id: LimitId,
    pub name: String,
    pub plan: Option<String>,
    pub allowed_amount: f64,
    pub used_amount: f64,
    pub remaining_amount: f64,
    pub reset_frequency: Option<ResetFrequency>,
    pub last_reset_at: DateTime<Utc>,
    pub next_reset_at: Option<DateTime<Utc>>,
}

impl UsageReport {
    pub fn new(record: &LimitRecord, state: &UsageState) -> Self {
        Self {
            limit_id: *record.id(),
            name: record.name.clone(),
            plan: record.plan.clone(),
            allowed_amount: record.allowed_amount,
            used_amount: state.used_amount(record),
            remaining_amount: state.remaining_amount,
            reset_frequency: record.reset_frequency,
            last_reset_at: state.last_reset_at,
            next_reset_at: ResetScheduler::next_reset_at(
                record.reset_frequency,
                state.last_reset_at,
            ),
        }
    }
}
