//! Graceful degradation: serve stale data instead of nothing.
//!
//! Wraps a primary operation with an optional cache and an optional
//! fallback. A degraded result is explicitly tagged so callers can tell
//! fresh data from stale.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use vigil_core::error::VigilError;

/// A value that may be stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded<T> {
    /// The value itself.
    pub value: T,
    /// True when the value did not come from the primary operation.
    pub degraded: bool,
    /// Why the primary failed, when degraded.
    pub reason: Option<String>,
}

impl<T> Degraded<T> {
    fn fresh(value: T) -> Self {
        Self { value, degraded: false, reason: None }
    }

    fn stale(value: T, reason: String) -> Self {
        Self { value, degraded: true, reason: Some(reason) }
    }
}

/// Keyed in-memory cache of last known good values.
#[derive(Debug, Default)]
pub struct ValueCache<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T: Clone> ValueCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Last known good value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Stores a fresh value for a key.
    pub fn put(&self, key: impl Into<String>, value: T) {
        self.entries.lock().unwrap().insert(key.into(), value);
    }
}

/// Attempts `primary`; on failure serves the cached value for `key` if one
/// exists (tagged degraded with the failure reason), otherwise runs the
/// fallback if present, otherwise propagates the failure.
///
/// Successful primary results are written through to the cache.
pub async fn with_fallback<T, F, Fut>(
    key: &str,
    primary: F,
    cache: Option<&ValueCache<T>>,
    fallback: Option<BoxFuture<'_, Result<T, VigilError>>>,
) -> Result<Degraded<T>, VigilError>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, VigilError>>,
{
    match primary().await {
        Ok(value) => {
            if let Some(cache) = cache {
                cache.put(key, value.clone());
            }
            Ok(Degraded::fresh(value))
        }
        Err(e) => {
            if let Some(cached) = cache.and_then(|c| c.get(key)) {
                warn!(key = key, error = %e, "Primary failed, serving last known good value");
                return Ok(Degraded::stale(cached, e.to_string()));
            }
            if let Some(fallback) = fallback {
                warn!(key = key, error = %e, "Primary failed with no cached value, invoking fallback");
                return fallback.await.map(|value| Degraded::stale(value, e.to_string()));
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn down() -> VigilError {
        VigilError::Transient { reason: "dependency down".to_string() }
    }

    #[tokio::test]
    async fn test_primary_success_is_fresh_and_cached() {
        let cache = ValueCache::new();
        let result = with_fallback("status", || async { Ok(json!({"ok": true})) }, Some(&cache), None)
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(cache.get("status"), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_failure_serves_cached_value_tagged_degraded() {
        let cache = ValueCache::new();
        cache.put("status", json!({"ok": true}));

        let result: Degraded<Value> =
            with_fallback("status", || async { Err(down()) }, Some(&cache), None)
                .await
                .unwrap();

        assert!(result.degraded);
        assert_eq!(result.value, json!({"ok": true}));
        assert!(result.reason.as_deref().unwrap().contains("dependency down"));
    }

    #[tokio::test]
    async fn test_failure_without_cache_invokes_fallback() {
        let result: Degraded<Value> = with_fallback(
            "status",
            || async { Err(down()) },
            None,
            Some(Box::pin(async { Ok(json!("fallback")) })),
        )
        .await
        .unwrap();

        assert!(result.degraded);
        assert_eq!(result.value, json!("fallback"));
    }

    #[tokio::test]
    async fn test_failure_without_cache_or_fallback_propagates() {
        let result: Result<Degraded<Value>, _> =
            with_fallback("status", || async { Err(down()) }, None, None).await;
        assert!(matches!(result, Err(VigilError::Transient { .. })));
    }

    #[tokio::test]
    async fn test_cache_preferred_over_fallback() {
        let cache = ValueCache::new();
        cache.put("status", json!("cached"));

        let result: Degraded<Value> = with_fallback(
            "status",
            || async { Err(down()) },
            Some(&cache),
            Some(Box::pin(async { Ok(json!("fallback")) })),
        )
        .await
        .unwrap();

        assert_eq!(result.value, json!("cached"));
    }
}
