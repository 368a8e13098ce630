//! Storage domain - persistence port for limits and usage states

mod repository;

pub use repository::{usage_state_key, LimitStorage};
