//! Consumption state transitions
//!
//! Pure functions over `(LimitRecord, UsageState)`. Nothing here touches
//! storage; callers persist the returned values.

use chrono::{DateTime, Utc};

use super::UsageState;
use crate::domain::limit::LimitRecord;
use crate::domain::DomainError;

/// Lifecycle phase of a usage state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsagePhase {
    /// Full allowance available
    Fresh,
    /// Partially consumed
    Active,
    /// Nothing left
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumptionEngine;

impl ConsumptionEngine {
    /// Raises the ceiling. `amount` must be positive.
    pub fn increment_allowance(
        record: &LimitRecord,
        amount: f64,
    ) -> Result<LimitRecord, DomainError> {
        ensure_positive(amount)?;

        let mut next = record.clone();
        next.allowed_amount += amount;
        Ok(next)
    }

    /// Lowers the ceiling. Fails without mutation if the result would be negative.
    pub fn decrement_allowance(
        record: &LimitRecord,
        amount: f64,
    ) -> Result<LimitRecord, DomainError> {
        ensure_finite(amount)?;

        let allowed = record.allowed_amount - amount;

        if allowed < 0.0 {
            return Err(DomainError::invalid_argument(format!(
                "\"allowed_amount\" of limit '{}' should be greater than or equal to 0",
                record.name
            )));
        }

        let mut next = record.clone();
        next.allowed_amount = allowed;
        Ok(next)
    }

    /// Takes `amount` from the subject's remaining allowance.
    ///
    /// The only transition that fails on insufficient allowance; the input
    /// state is left as it was.
    pub fn consume(
        state: &UsageState,
        record: &LimitRecord,
        amount: f64,
    ) -> Result<UsageState, DomainError> {
        ensure_positive(amount)?;

        if state.remaining_amount < amount {
            return Err(DomainError::exhausted(
                &record.name,
                record.plan(),
                amount,
                state.remaining_amount,
            ));
        }

        let mut next = state.clone();
        next.remaining_amount -= amount;
        Ok(next)
    }

    /// Gives back `amount`, never above the ceiling
    pub fn restore(
        state: &UsageState,
        record: &LimitRecord,
        amount: f64,
    ) -> Result<UsageState, DomainError> {
        ensure_positive(amount)?;

        let mut next = state.clone();
        next.remaining_amount = (state.remaining_amount + amount).min(record.allowed_amount);
        Ok(next)
    }

    pub fn reset(state: &UsageState, record: &LimitRecord, now: DateTime<Utc>) -> UsageState {
        let mut next = state.clone();
        next.remaining_amount = record.allowed_amount;
        next.last_reset_at = now;
        next
    }

    /// Clamps a stored remaining amount into `[0, allowed_amount]`.
    ///
    /// Needed after the ceiling of a limit was lowered below what a subject
    /// still had left.
    pub fn reconcile(state: &UsageState, record: &LimitRecord) -> UsageState {
        let mut next = state.clone();
        next.remaining_amount = state.remaining_amount.clamp(0.0, record.allowed_amount);
        next
    }

    /// Whether `consume` would succeed for `amount`; same argument checks
    pub fn can_consume(state: &UsageState, amount: f64) -> Result<bool, DomainError> {
        ensure_positive(amount)?;
        Ok(state.remaining_amount >= amount)
    }

    pub fn remaining(state: &UsageState) -> f64 {
        state.remaining_amount
    }

    pub fn is_exhausted(state: &UsageState) -> bool {
        state.remaining_amount <= 0.0
    }

    pub fn phase(state: &UsageState, record: &LimitRecord) -> UsagePhase {
        if Self::is_exhausted(state) {
            UsagePhase::Exhausted
        } else if state.remaining_amount >= record.allowed_amount {
            UsagePhase::Fresh
        } else {
            UsagePhase::Active
        }
    }
}

fn ensure_finite(amount: f64) -> Result<(), DomainError> {
    if !amount.is_finite() {
        return Err(DomainError::invalid_argument("\"amount\" should be a finite number"));
    }
    Ok(())
}

fn ensure_positive(amount: f64) -> Result<(), DomainError> {
    ensure_finite(amount)?;

    if amount <= 0.0 {
        return Err(DomainError::invalid_argument("\"amount\" should be greater than 0"));
    }
    Ok(())
}
