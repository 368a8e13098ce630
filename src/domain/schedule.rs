//! Reset scheduling
//!
//! Boundaries are computed in UTC. Sub-month frequencies advance by a fixed
//! duration; month-based frequencies advance by calendar months and clamp the
//! day to the target month's length (Jan 31 + 1 month = Feb 28/29).

use chrono::{DateTime, Duration, Months, Utc};

use super::limit::ResetFrequency;

/// Computes reset boundaries for a [`ResetFrequency`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetScheduler;

impl ResetScheduler {
    /// Next reset boundary strictly after `from`.
    ///
    /// Returns `None` for unscheduled limits (absent or `never`) and when the
    /// boundary would overflow the representable date range.
    pub fn next_reset_at(
        frequency: Option<ResetFrequency>,
        from: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match frequency? {
            ResetFrequency::EverySecond => from.checked_add_signed(Duration::seconds(1)),
            ResetFrequency::EveryMinute => from.checked_add_signed(Duration::minutes(1)),
            ResetFrequency::EveryHour => from.checked_add_signed(Duration::hours(1)),
            ResetFrequency::EveryDay => from.checked_add_signed(Duration::days(1)),
            ResetFrequency::EveryWeek => from.checked_add_signed(Duration::weeks(1)),
            ResetFrequency::EveryTwoWeeks => from.checked_add_signed(Duration::weeks(2)),
            ResetFrequency::EveryMonth => from.checked_add_months(Months::new(1)),
            ResetFrequency::EveryQuarter => from.checked_add_months(Months::new(3)),
            ResetFrequency::EverySixMonths => from.checked_add_months(Months::new(6)),
            ResetFrequency::EveryYear => from.checked_add_months(Months::new(12)),
            ResetFrequency::Never => None,
        }
    }

    /// Whether a state last reset at `last_reset_at` is due at `now`
    pub fn is_due(
        last_reset_at: DateTime<Utc>,
        frequency: Option<ResetFrequency>,
        now: DateTime<Utc>,
    ) -> bool {
        Self::next_reset_at(frequency, last_reset_at).is_some_and(|next| now >= next)
    }
}
