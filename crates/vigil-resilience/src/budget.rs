//! System-wide retry budget.
//!
//! Per-operation backoff is not enough on its own: across many loop
//! iterations an operation retrying "politely" can still hammer a dependency
//! that is down for hours. The budget caps the total retries recorded per
//! operation name within a trailing window, shared by every caller.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;
use vigil_core::config::BudgetConfig;

/// Shared, time-windowed retry counter keyed by operation name.
#[derive(Debug)]
pub struct RetryBudget {
    ceiling: u32,
    window: Duration,
    /// Timestamps of recorded retry attempts per operation (sliding window).
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RetryBudget {
    /// Creates a budget allowing `ceiling` retries per operation per `window`.
    #[must_use]
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self { ceiling, window, attempts: Mutex::new(HashMap::new()) }
    }

    /// Creates a budget from configuration.
    #[must_use]
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.ceiling, config.window())
    }

    /// Asks permission for one more retry of the named operation.
    ///
    /// Returns false once the ceiling is reached within the trailing window;
    /// a declined request is not recorded, so concurrent callers can never
    /// overdraw the window.
    pub fn can_retry(&self, name: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        let entries = attempts.entry(name.to_string()).or_default();

        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) > self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() as u32 >= self.ceiling {
            warn!(
                operation = name,
                ceiling = self.ceiling,
                window = ?self.window,
                "Retry budget ceiling reached"
            );
            false
        } else {
            entries.push_back(now);
            true
        }
    }

    /// Retries still available for the named operation in the current window.
    #[must_use]
    pub fn remaining(&self, name: &str) -> u32 {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        let entries = attempts.entry(name.to_string()).or_default();
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) > self.window {
                entries.pop_front();
            } else {
                break;
            }
        }
        self.ceiling.saturating_sub(entries.len() as u32)
    }
}
