//! Per-dependency concurrency bulkhead.
//!
//! A fixed-capacity semaphore gate in front of one dependency. Callers queue
//! for a slot, so a slow dependency backs up only its own callers; every
//! other dependency has its own bulkhead and keeps flowing.

use std::sync::Arc;
use tokio::sync::Semaphore;
use vigil_core::config::BulkheadConfig;
use vigil_core::error::VigilError;

/// Bounded concurrency gate for one dependency.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    name: String,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Bulkhead {
    /// Creates a bulkhead admitting at most `capacity` concurrent calls.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self { name: name.into(), semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Creates a bulkhead from configuration.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &BulkheadConfig) -> Self {
        Self::new(name, config.capacity)
    }

    /// Runs `op` once a slot is free; the slot is released when the
    /// operation completes or fails.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, VigilError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, VigilError>>,
    {
        let _permit = self.semaphore.acquire().await.map_err(|_| VigilError::Internal {
            reason: format!("bulkhead '{}' semaphore closed", self.name),
        })?;
        op().await
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
