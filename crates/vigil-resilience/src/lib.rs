//! Resilience primitives for the Vigil orchestration platform.
//!
//! Generic, platform-agnostic building blocks used by every outbound call
//! the control loop makes: bounded retry with backoff and jitter, a
//! system-wide retry budget, per-dependency circuit breakers and concurrency
//! bulkheads, and a degrade-to-cache fallback wrapper. All state is owned,
//! not global, so independent orchestrator instances never interfere.

pub mod breaker;
pub mod budget;
pub mod bulkhead;
pub mod degrade;
pub mod retry;
pub mod shield;

pub use breaker::{BreakerState, CircuitBreaker};
pub use budget::RetryBudget;
pub use bulkhead::Bulkhead;
pub use degrade::{Degraded, ValueCache, with_fallback};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_budget};
pub use shield::{Shield, ShieldRegistry};
