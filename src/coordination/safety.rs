//! Cross-process safety breaker.
//!
//! The breaker's state lives in the coordination store so every worker
//! process observes the same open/closed decision. After a configured
//! number of consecutive live-acquisition failures it opens for a cooldown
//! window, during which callers skip live tiers entirely.
//!
//! All store errors fail open: a coordination-store outage degrades to
//! normal live acquisition rather than forcing every worker into
//! synthetic-only mode.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::CoordinationStore;

const KEY_SAFETY_UNTIL: &str = "crawler:safety_until";
const KEY_FAILURES: &str = "crawler:consecutive_failures";

/// Snapshot of breaker state for status reporting.
#[derive(Debug, Clone, Default)]
pub struct SafetyStatus {
    pub open: bool,
    pub consecutive_failures: i64,
    pub open_until: Option<DateTime<Utc>>,
}

/// Circuit breaker gating live acquisition tiers.
pub struct SafetyBreaker {
    store: Arc<dyn CoordinationStore>,
    threshold: i64,
    cooldown: Duration,
}

impl SafetyBreaker {
    pub fn new(store: Arc<dyn CoordinationStore>, threshold: i64, cooldown: Duration) -> Self {
        Self {
            store,
            threshold,
            cooldown,
        }
    }

    /// Check whether the breaker is open.
    ///
    /// An expired window transitions the breaker back to closed and clears
    /// both keys. Store errors are treated as closed.
    pub async fn is_open(&self) -> bool {
        let value = match self.store.get(KEY_SAFETY_UNTIL).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Safety check failed, failing open: {}", e);
                return false;
            }
        };

        let Some(raw) = value else {
            return false;
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(until) if until.with_timezone(&Utc) > Utc::now() => true,
            _ => {
                // Window elapsed (or value unparseable): reset to closed.
                let _ = self.store.delete(KEY_SAFETY_UNTIL).await;
                let _ = self.store.delete(KEY_FAILURES).await;
                false
            }
        }
    }

    /// Record a successful live acquisition. Resets the failure counter but
    /// never shortens an active safety window.
    pub async fn record_success(&self) {
        if let Err(e) = self.store.delete(KEY_FAILURES).await {
            warn!("Failed to reset failure counter: {}", e);
        }
    }

    /// Record a failed live acquisition. Opens the breaker once the
    /// consecutive-failure threshold is reached.
    pub async fn record_failure(&self) {
        let failures = match self.store.incr(KEY_FAILURES).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to increment failure counter: {}", e);
                return;
            }
        };

        if failures >= self.threshold {
            let until = Utc::now() + chrono::Duration::from_std(self.cooldown).unwrap_or_default();
            match self
                .store
                .set_ex(KEY_SAFETY_UNTIL, &until.to_rfc3339(), self.cooldown)
                .await
            {
                Ok(()) => info!(
                    "Safety breaker opened after {} consecutive failures, until {}",
                    failures, until
                ),
                Err(e) => warn!("Failed to open safety breaker: {}", e),
            }
        }
    }

    /// Current breaker state for operator inspection.
    pub async fn status(&self) -> SafetyStatus {
        let open_until = self
            .store
            .get(KEY_SAFETY_UNTIL)
            .await
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let consecutive_failures = self
            .store
            .get(KEY_FAILURES)
            .await
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        SafetyStatus {
            open: open_until.map(|u| u > Utc::now()).unwrap_or(false),
            consecutive_failures,
            open_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;

    fn breaker(store: Arc<dyn CoordinationStore>) -> SafetyBreaker {
        SafetyBreaker::new(store, 5, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let store = Arc::new(MemoryStore::new());
        let breaker = breaker(store);

        for _ in 0..4 {
            breaker.record_failure().await;
            assert!(!breaker.is_open().await);
        }
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let store = Arc::new(MemoryStore::new());
        let breaker = breaker(store);

        for _ in 0..4 {
            breaker.record_failure().await;
        }
        breaker.record_success().await;
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_cooldown_elapses_and_clears() {
        let store = Arc::new(MemoryStore::new());
        let breaker = SafetyBreaker::new(store.clone(), 2, Duration::from_millis(20));

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(breaker.is_open().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!breaker.is_open().await);

        // Counter was cleared along with the window
        let status = breaker.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert!(!status.open);
    }

    #[tokio::test]
    async fn test_success_does_not_close_open_breaker() {
        let store = Arc::new(MemoryStore::new());
        let breaker = SafetyBreaker::new(store, 2, Duration::from_secs(3600));

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(breaker.is_open().await);

        breaker.record_success().await;
        assert!(breaker.is_open().await);
    }

    struct FailingStore;

    #[async_trait]
    impl CoordinationStore for FailingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Connection("store unavailable".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(StoreError::Connection("store unavailable".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Connection("store unavailable".into()))
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Connection("store unavailable".into()))
        }
        async fn incr(&self, _key: &str) -> StoreResult<i64> {
            Err(StoreError::Connection("store unavailable".into()))
        }
        async fn incr_window(&self, _key: &str, _ttl: Duration) -> StoreResult<i64> {
            Err(StoreError::Connection("store unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_fails_open_on_store_outage() {
        let breaker = breaker(Arc::new(FailingStore));

        // Recording cannot wedge the worker, and checks pass
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);
    }
}
