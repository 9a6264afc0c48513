//! Orchestrator configuration.
//!
//! Plain serde structs with defaults suitable for production; durations are
//! carried as integer fields and exposed through `Duration` accessors.

use crate::error::VigilError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Loop polling period in seconds.
    pub poll_interval_secs: u64,
    /// Timeout for one remote-call attempt, in seconds.
    pub call_timeout_secs: u64,
    /// Backoff after an unrecoverable internal iteration error, in seconds.
    pub error_backoff_secs: u64,
    /// World-model history bounds.
    pub world: WorldConfig,
    /// Retry policy for outbound calls.
    pub retry: RetryConfig,
    /// System-wide retry budget.
    pub budget: BudgetConfig,
    /// Per-dependency circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Per-dependency concurrency bulkhead settings.
    pub bulkhead: BulkheadConfig,
    /// Deployment monitoring settings.
    pub monitor: MonitorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            call_timeout_secs: 30,
            error_backoff_secs: 5,
            world: WorldConfig::default(),
            retry: RetryConfig::default(),
            budget: BudgetConfig::default(),
            breaker: BreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// World-model history bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Maximum number of observations retained in history.
    pub max_history: usize,
    /// Maximum age of retained observations, in seconds.
    pub max_age_secs: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self { max_history: 500, max_age_secs: 3600 }
    }
}

/// Retry policy settings for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum total attempts per call (first attempt included).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on the backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound on the random jitter added per wait, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 250, max_delay_ms: 10_000, jitter_ms: 100 }
    }
}

/// System-wide retry budget settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum retries per operation name within the window.
    pub ceiling: u32,
    /// Trailing window length in seconds.
    pub window_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { ceiling: 50, window_secs: 3600 }
    }
}

/// Circuit breaker settings, applied per dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Cooldown before an open circuit allows a trial call, in seconds.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, cooldown_secs: 60 }
    }
}

/// Bulkhead settings, applied per dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum concurrent in-flight calls to one dependency.
    pub capacity: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { capacity: 4 }
    }
}

/// Deployment monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Status polling period in seconds.
    pub poll_interval_secs: u64,
    /// Overall monitoring deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 10, timeout_secs: 600 }
    }
}

impl OrchestratorConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, VigilError> {
        let config: Self =
            toml::from_str(s).map_err(|e| VigilError::Config { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would disable the loop's guarantees.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.retry.max_attempts == 0 {
            return Err(VigilError::Config { reason: "retry.max_attempts must be >= 1".into() });
        }
        if self.bulkhead.capacity == 0 {
            return Err(VigilError::Config { reason: "bulkhead.capacity must be >= 1".into() });
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(VigilError::Config {
                reason: "breaker thresholds must be >= 1".into(),
            });
        }
        if self.budget.ceiling == 0 {
            return Err(VigilError::Config { reason: "budget.ceiling must be >= 1".into() });
        }
        if self.world.max_history == 0 {
            return Err(VigilError::Config { reason: "world.max_history must be >= 1".into() });
        }
        if self.poll_interval_secs == 0 {
            return Err(VigilError::Config { reason: "poll_interval_secs must be >= 1".into() });
        }
        Ok(())
    }

    /// Loop polling period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-attempt remote-call timeout.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Backoff after an internal iteration error.
    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl WorldConfig {
    /// Maximum age of retained observations.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl RetryConfig {
    /// Base backoff delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Ceiling on the backoff delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Jitter bound.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl BudgetConfig {
    /// Trailing window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl BreakerConfig {
    /// Cooldown before a trial call is allowed.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl MonitorConfig {
    /// Status polling period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Overall monitoring deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            poll_interval_secs = 10

            [retry]
            max_attempts = 5
            base_delay_ms = 100

            [breaker]
            failure_threshold = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(100));
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep defaults.
        assert_eq!(config.bulkhead.capacity, 4);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let err = OrchestratorConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, VigilError::Config { .. }));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = OrchestratorConfig::default();
        config.bulkhead.capacity = 0;
        assert!(config.validate().is_err());
    }
}
