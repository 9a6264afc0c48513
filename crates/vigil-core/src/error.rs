//! Error taxonomy for the orchestration core.
//!
//! Every failure that crosses a component boundary is classified into one of
//! a small set of classes so that the resilience layer and the decision
//! policy can react uniformly: transient failures are retried, persistent
//! failures are surfaced as data, invariant violations are fatal to the one
//! operation that raised them.

use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, VigilError>;

/// Failure classes recognized by the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VigilError {
    /// Transient failure that may succeed on retry (network timeout, rate limit).
    #[error("transient failure: {reason}")]
    Transient {
        /// Reason for the transient failure.
        reason: String,
    },

    /// Persistent remote-side rejection that will not succeed on retry.
    #[error("persistent failure: {reason}")]
    Persistent {
        /// Reason for the persistent failure.
        reason: String,
    },

    /// Circuit breaker is open for a dependency; no remote call was attempted.
    #[error("circuit open for dependency '{dependency}'")]
    CircuitOpen {
        /// Dependency whose circuit is open.
        dependency: String,
    },

    /// The system-wide retry budget for an operation is exhausted.
    #[error("retry budget exhausted for operation '{operation}'")]
    BudgetExhausted {
        /// Operation name whose budget ran out.
        operation: String,
    },

    /// A deployment-monitoring wait exceeded its deadline.
    ///
    /// The display form starts with `monitor timeout` so the decision policy
    /// can recognize the class when it surfaces inside an observation error.
    #[error("monitor timeout after {waited:?}")]
    MonitorTimeout {
        /// How long the monitor waited before giving up.
        waited: Duration,
    },

    /// Illegal deployment state transition. Always a contract violation.
    #[error("invalid deployment transition: {from} -> {to}")]
    InvalidTransition {
        /// State the record was in.
        from: String,
        /// State the caller attempted to reach.
        to: String,
    },

    /// No handler is registered for the requested action.
    #[error("unknown action '{action}': no handler registered")]
    UnknownAction {
        /// Action name that could not be routed.
        action: String,
    },

    /// Audit sink failure (already logged through the fallback sink).
    #[error("audit sink failure: {0}")]
    Audit(String),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// Internal invariant violation inside the loop itself.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the violated invariant.
        reason: String,
    },
}

impl VigilError {
    /// Returns true if the failure may succeed on retry.
    ///
    /// Only `Transient` qualifies: circuit-open and budget failures exist
    /// precisely to stop retries, and everything else is either a remote
    /// rejection or a programming error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classifies a raw remote-call failure message into a failure class.
    ///
    /// Transport-level noise (timeouts, rate limits, connection drops) maps
    /// to `Transient`; anything else is treated as a remote-side rejection
    /// and maps to `Persistent` so it is never retried blindly.
    #[must_use]
    pub fn classify_remote(message: &str) -> Self {
        let lower = message.to_lowercase();

        const TRANSIENT_MARKERS: &[&str] = &[
            "timeout",
            "timed out",
            "rate limit",
            "too many requests",
            "429",
            "502",
            "503",
            "504",
            "connection refused",
            "connection reset",
            "temporarily unavailable",
            "service unavailable",
        ];

        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Transient { reason: message.to_string() }
        } else {
            Self::Persistent { reason: message.to_string() }
        }
    }
}
