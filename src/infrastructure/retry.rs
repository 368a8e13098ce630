//! Bounded retries and storage timeouts

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::config::RetrySettings;
use crate::domain::DomainError;

/// Exponential backoff policy for transient storage failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay_ms: settings.backoff_ms,
            max_delay_ms: settings.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the retry following `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);

        Duration::from_millis(delay)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. The last error is returned.
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        operation = name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient storage failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bounds a storage call; elapsed calls surface as [`DomainError::StorageTimeout`]
pub async fn with_timeout<T, Fut>(
    limit: Duration,
    operation: &str,
    future: Fut,
) -> Result<T, DomainError>
where
    Fut: Future<Output = Result<T, DomainError>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::storage_timeout(format!(
            "{} (after {}ms)",
            operation,
            limit.as_millis()
        ))),
    }
}
