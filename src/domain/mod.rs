//! Domain layer - Core business logic and entities

pub mod cache;
pub mod clock;
pub mod error;
pub mod limit;
pub mod schedule;
pub mod storage;
pub mod usage;

pub use cache::{Cache, CacheExt, LimitCacheKeys};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use limit::{LimitId, LimitRecord, NewLimit, ResetFrequency, ValidatedLimit, DEFAULT_AMOUNT};
pub use schedule::ResetScheduler;
pub use storage::LimitStorage;
pub use usage::{ConsumptionEngine, SubjectId, UsagePhase, UsageReport, UsageState};
