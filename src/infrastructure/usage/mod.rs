//! Usage tracking infrastructure implementations

mod tracker;

pub use tracker::UsageTracker;
