//! Limit domain
//!
//! A limit is a named, optionally plan-scoped allowance with an optional
//! recurring reset.

mod frequency;
mod record;

pub use frequency::ResetFrequency;
pub use record::{normalize_plan, LimitId, LimitRecord, NewLimit, ValidatedLimit};

/// Amount used when a caller does not specify one
pub const DEFAULT_AMOUNT: f64 = 1.0;
