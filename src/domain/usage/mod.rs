//! Usage domain
//!
//! Per-subject remaining allowances and the transitions that mutate them.

mod engine;
mod report;
mod state;

pub use engine::{ConsumptionEngine, UsagePhase};
pub use report::UsageReport;
pub use state::{SubjectId, UsageState};
