//! Rate limiting for outbound requests, keyed by endpoint family.
//!
//! Two layers: process-local pacing (minimum interval between requests to
//! one family, with backoff after 429s) and a fixed-window counter in the
//! coordination store shared by all workers. Store errors fail open so a
//! coordination outage never stalls acquisition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::coordination::CoordinationStore;

/// Rate limiter tuning.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per family per window across all workers.
    pub requests_per_window: u32,
    /// Window length for the shared counter.
    pub window: Duration,
    /// Local minimum interval between requests to one family.
    pub min_interval: Duration,
    /// Interval multiplier applied after a rate-limit response.
    pub backoff_multiplier: f64,
    /// Upper bound on the backed-off interval.
    pub max_interval: Duration,
    /// Successes needed before the interval recovers one step.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 20,
            window: Duration::from_secs(60),
            min_interval: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(120),
            recovery_threshold: 3,
        }
    }
}

#[derive(Debug)]
struct FamilyState {
    last_request: Option<Instant>,
    current_interval: Duration,
    in_backoff: bool,
    consecutive_successes: u32,
}

impl FamilyState {
    fn new(interval: Duration) -> Self {
        Self {
            last_request: None,
            current_interval: interval,
            in_backoff: false,
            consecutive_successes: 0,
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self
                .current_interval
                .saturating_sub(Instant::now().duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Gate in front of outbound requests to a source endpoint family.
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
    config: RateLimitConfig,
    families: HashMap<String, FamilyState>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            families: HashMap::new(),
        }
    }

    /// Wait until a request to the family is allowed, then count it.
    pub async fn acquire(&mut self, family: &str) {
        // Local pacing first
        let wait = self
            .families
            .get(family)
            .map(|s| s.time_until_ready())
            .unwrap_or(Duration::ZERO);
        if wait > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", family, wait);
            tokio::time::sleep(wait).await;
        }

        // Shared window budget, fail-open on store errors
        let key = format!("crawler:rate:{}", family);
        match self.store.incr_window(&key, self.config.window).await {
            Ok(count) if count > self.config.requests_per_window as i64 => {
                debug!(
                    "Window budget exhausted for {} ({} > {}), backing off one window",
                    family, count, self.config.requests_per_window
                );
                tokio::time::sleep(self.config.window).await;
            }
            Ok(_) => {}
            Err(e) => warn!("Rate-limit counter unavailable, proceeding: {}", e),
        }

        let state = self
            .families
            .entry(family.to_string())
            .or_insert_with(|| FamilyState::new(self.config.min_interval));
        state.last_request = Some(Instant::now());
    }

    /// Report a successful response. Gradually recovers from backoff.
    pub fn report_success(&mut self, family: &str) {
        let Some(state) = self.families.get_mut(family) else {
            return;
        };
        state.consecutive_successes += 1;

        if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
            let halved = state.current_interval / 2;
            state.current_interval = halved.max(self.config.min_interval);
            state.consecutive_successes = 0;
            if state.current_interval <= self.config.min_interval {
                state.in_backoff = false;
                debug!("Family {} recovered from backoff", family);
            }
        }
    }

    /// Report a 429/503 response. Backs the family's interval off.
    pub fn report_rate_limited(&mut self, family: &str) {
        let state = self
            .families
            .entry(family.to_string())
            .or_insert_with(|| FamilyState::new(self.config.min_interval));
        state.in_backoff = true;
        state.consecutive_successes = 0;

        let scaled = Duration::from_secs_f64(
            state.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        state.current_interval = scaled.min(self.config.max_interval);
        warn!(
            "Rate limited by {}, interval now {:?}",
            family, state.current_interval
        );
    }

    /// Current interval for a family (min interval if unseen).
    pub fn current_interval(&self, family: &str) -> Duration {
        self.families
            .get(family)
            .map(|s| s.current_interval)
            .unwrap_or(self.config.min_interval)
    }
}
