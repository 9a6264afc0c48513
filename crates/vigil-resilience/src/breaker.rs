//! Circuit breaker for dependency failure detection.
//!
//! One breaker guards one remote dependency. Consecutive failures open the
//! circuit; while open, calls fail fast without touching the network. After
//! a cooldown the breaker admits exactly one trial call at a time, and
//! commits back to Closed or Open based on how the trials go.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vigil_core::config::BreakerConfig;
use vigil_core::error::VigilError;

/// Circuit state for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast; the instant records the last failure.
    Open(Instant),
    /// Testing recovery with single trial calls.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Consecutive failures while Closed.
    failure_count: u32,
    /// Successes accumulated while HalfOpen.
    success_count: u32,
    /// A half-open trial call is currently in flight.
    trial_in_flight: bool,
    /// Bumped on every state change; settlements from an earlier generation
    /// are ignored so a slow call admitted while Closed cannot be mistaken
    /// for a half-open trial.
    generation: u64,
}

/// Per-dependency circuit breaker.
///
/// Shared between concurrent tasks via `Arc`; all state lives behind one
/// lock and the wrapped operation runs outside of it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker for the named dependency.
    ///
    /// # Arguments
    /// * `failure_threshold` - Consecutive failures that open the circuit
    /// * `success_threshold` - Half-open successes required to close it
    /// * `cooldown` - Wait before an open circuit admits a trial call
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                trial_in_flight: false,
                generation: 0,
            }),
            failure_threshold,
            success_threshold,
            cooldown,
        }
    }

    /// Creates a breaker from configuration.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            config.success_threshold,
            config.cooldown(),
        )
    }

    /// Runs `op` through the breaker.
    ///
    /// When the circuit is open and the cooldown has not elapsed, the
    /// operation closure is never invoked and the call fails immediately
    /// with `VigilError::CircuitOpen`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, VigilError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, VigilError>>,
    {
        let generation = self.admit()?;
        let result = op().await;
        self.settle(generation, result.is_ok());
        result
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Decides whether a call may proceed, transitioning Open -> HalfOpen
    /// when the cooldown has elapsed. Returns the generation the admission
    /// belongs to.
    fn admit(&self) -> Result<u64, VigilError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(inner.generation),
            BreakerState::Open(last_failure) => {
                if last_failure.elapsed() >= self.cooldown {
                    debug!(dependency = %self.name, "Circuit breaker: Open -> HalfOpen (cooldown elapsed)");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    inner.trial_in_flight = true;
                    inner.generation += 1;
                    Ok(inner.generation)
                } else {
                    Err(VigilError::CircuitOpen { dependency: self.name.clone() })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    // Only one trial at a time probes the dependency.
                    Err(VigilError::CircuitOpen { dependency: self.name.clone() })
                } else {
                    inner.trial_in_flight = true;
                    Ok(inner.generation)
                }
            }
        }
    }

    /// Records the outcome of an admitted call. Outcomes from before the
    /// last state change no longer map to the current state and are dropped.
    fn settle(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            debug!(dependency = %self.name, "Ignoring settlement from a superseded breaker state");
            return;
        }
        match inner.state {
            BreakerState::HalfOpen => {
                inner.trial_in_flight = false;
                if success {
                    inner.success_count += 1;
                    if inner.success_count >= self.success_threshold {
                        debug!(dependency = %self.name, "Circuit breaker: HalfOpen -> Closed (recovery confirmed)");
                        inner.state = BreakerState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.generation += 1;
                    }
                } else {
                    warn!(dependency = %self.name, "Circuit breaker: HalfOpen -> Open (trial failed)");
                    inner.state = BreakerState::Open(Instant::now());
                    inner.success_count = 0;
                    inner.generation += 1;
                }
            }
            BreakerState::Closed => {
                if success {
                    inner.failure_count = 0;
                } else {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.failure_threshold {
                        warn!(
                            dependency = %self.name,
                            failures = inner.failure_count,
                            threshold = self.failure_threshold,
                            "Circuit breaker: Closed -> Open (failure threshold reached)"
                        );
                        inner.state = BreakerState::Open(Instant::now());
                        inner.generation += 1;
                    }
                }
            }
            // Matching generations never observe Open: every transition into
            // Open bumps the generation.
            BreakerState::Open(_) => {}
        }
    }
}
