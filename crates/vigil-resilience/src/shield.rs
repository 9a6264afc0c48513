//! Per-dependency resilience composition.
//!
//! A [`Shield`] bundles the bulkhead, circuit breaker, retry policy and
//! per-attempt timeout for one dependency, nested in the order every
//! outbound call uses: bulkhead admits the caller, the breaker decides
//! whether the dependency is worth calling at all, and the retry loop wraps
//! each attempt in a timeout.

use crate::breaker::CircuitBreaker;
use crate::budget::RetryBudget;
use crate::bulkhead::Bulkhead;
use crate::retry::{RetryPolicy, retry_with_budget};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::config::OrchestratorConfig;
use vigil_core::error::VigilError;

/// Resilience wrapper for one dependency.
#[derive(Debug)]
pub struct Shield {
    name: String,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
    budget: Arc<RetryBudget>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl Shield {
    /// Creates a shield for the named dependency, sharing the system-wide
    /// retry budget.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &OrchestratorConfig, budget: Arc<RetryBudget>) -> Self {
        let name = name.into();
        Self {
            bulkhead: Bulkhead::from_config(name.clone(), &config.bulkhead),
            breaker: CircuitBreaker::from_config(name.clone(), &config.breaker),
            budget,
            retry: RetryPolicy::from(&config.retry),
            call_timeout: config.call_timeout(),
            name,
        }
    }

    /// Dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dependency's circuit breaker, for diagnostics.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `op` through bulkhead, breaker, and budgeted retry, with each
    /// attempt individually bounded by the call timeout.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, VigilError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, VigilError>>,
    {
        self.bulkhead
            .execute(|| async {
                self.breaker
                    .call(|| async {
                        retry_with_budget(&self.retry, &self.budget, &self.name, || async {
                            match tokio::time::timeout(self.call_timeout, op()).await {
                                Ok(result) => result,
                                Err(_) => Err(VigilError::Transient {
                                    reason: format!(
                                        "call to '{}' timed out after {:?}",
                                        self.name, self.call_timeout
                                    ),
                                }),
                            }
                        })
                        .await
                    })
                    .await
            })
            .await
    }
}

/// One shield per registered dependency, all sharing one retry budget.
#[derive(Debug)]
pub struct ShieldRegistry {
    shields: HashMap<String, Arc<Shield>>,
    fallback: Arc<Shield>,
    budget: Arc<RetryBudget>,
}

impl ShieldRegistry {
    /// Builds shields for every named dependency at startup.
    #[must_use]
    pub fn new<I, S>(config: &OrchestratorConfig, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let budget = Arc::new(RetryBudget::from_config(&config.budget));
        let shields = names
            .into_iter()
            .map(Into::into)
            .map(|name| {
                let shield = Arc::new(Shield::new(name.clone(), config, Arc::clone(&budget)));
                (name, shield)
            })
            .collect();
        let fallback = Arc::new(Shield::new("unregistered", config, Arc::clone(&budget)));
        Self { shields, fallback, budget }
    }

    /// Shield for the named dependency; unknown names share a fallback
    /// shield so no call ever goes out unprotected.
    #[must_use]
    pub fn shield(&self, name: &str) -> Arc<Shield> {
        self.shields.get(name).map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }

    /// The shared retry budget.
    #[must_use]
    pub fn budget(&self) -> &Arc<RetryBudget> {
        &self.budget
    }
}
