//! Bounded retry with exponential backoff and jitter.

use crate::budget::RetryBudget;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_core::config::RetryConfig;
use vigil_core::error::VigilError;

/// Backoff parameters for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum total invocations of the wrapped operation.
    pub max_attempts: u32,
    /// Base delay before the first re-attempt.
    pub base_delay: Duration,
    /// Ceiling on any single wait.
    pub max_delay: Duration,
    /// Upper bound on the random jitter added to each wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(100),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-attempt number `attempt` (zero-based):
    /// `min(base * 2^attempt + random(0, jitter), max)`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        // Cap the shift so the multiplier cannot overflow; max_delay clamps anyway.
        let backoff_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let jitter_bound = self.jitter.as_millis() as u64;
        let jitter_ms = if jitter_bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_bound)
        };
        Duration::from_millis(backoff_ms.saturating_add(jitter_ms)).min(self.max_delay)
    }
}

/// Retries `op` according to `policy`.
///
/// Non-retryable failures propagate immediately without a re-attempt; after
/// `max_attempts` invocations the last failure propagates. Wait times are
/// strictly bounded by the policy's `max_delay`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    name: &str,
    op: F,
) -> Result<T, VigilError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VigilError>>,
{
    retry_inner(policy, None, name, op).await
}

/// Like [`retry_with_backoff`], but asks the shared budget for permission
/// before every re-attempt. When the budget declines, the operation's last
/// real failure propagates (it is more diagnostic than a budget error) and
/// the exhaustion is logged.
pub async fn retry_with_budget<T, F, Fut>(
    policy: &RetryPolicy,
    budget: &RetryBudget,
    name: &str,
    op: F,
) -> Result<T, VigilError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VigilError>>,
{
    retry_inner(policy, Some(budget), name, op).await
}

async fn retry_inner<T, F, Fut>(
    policy: &RetryPolicy,
    budget: Option<&RetryBudget>,
    name: &str,
    mut op: F,
) -> Result<T, VigilError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VigilError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!(operation = name, error = %e, "Non-retryable failure, propagating");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(
                        operation = name,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                if let Some(budget) = budget {
                    if !budget.can_retry(name) {
                        warn!(operation = name, error = %e, "Retry budget declined re-attempt");
                        return Err(e);
                    }
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(operation = name, attempt, delay = ?delay, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
