//! Infrastructure layer - Storage, cache and service implementations

pub mod cache;
pub mod limit;
pub mod logging;
pub mod retry;
pub mod storage;
pub mod usage;
