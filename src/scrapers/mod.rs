//! Acquisition tiers and anti-detection support.
//!
//! Tiers share one contract: given a job, produce raw payloads or a
//! classified error. The worker runs them in priority order and stops at
//! the first tier that returns an acceptable batch; the synthetic catalog
//! tier terminates the chain unconditionally.

pub mod browser;
pub mod catalog;
pub mod direct;
pub mod extract;
pub mod fingerprint;
pub mod proxy;
pub mod rate_limiter;
pub mod retry;

pub use browser::BrowserTierConfig;
#[cfg(feature = "browser")]
pub use browser::RenderedBrowserTier;
pub use catalog::CatalogTier;
pub use direct::{DirectApiTier, DirectTierConfig, SessionToken};
pub use fingerprint::{Fingerprint, FingerprintGenerator};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;

use async_trait::async_trait;

use crate::models::{AcquisitionJob, RawPayload};

/// Classified acquisition failure.
///
/// The classification drives retry behavior, safety-breaker reporting, and
/// the error summary written to failed jobs.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// Network timeout at any boundary (request, navigation, selector wait).
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Expired or invalid session credentials. Never retried.
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    /// Block page or CAPTCHA signature matched. Never retried within a tier.
    #[error("bot detection triggered: {0}")]
    Detection(String),

    /// Unexpected HTTP status from the platform.
    #[error("platform returned HTTP {0}")]
    Http(u16),

    /// API-level error in an otherwise successful response envelope.
    #[error("platform api error: {0}")]
    Api(String),

    /// Browser launch or CDP failure.
    #[error("browser error: {0}")]
    Browser(String),
}

impl AcquireError {
    /// Whether the shared retry policy may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Http(status) => *status == 429 || *status >= 500,
            Self::Auth { .. } | Self::Detection(_) | Self::Browser(_) | Self::Api(_) => false,
        }
    }

    /// Short classification string for job records.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Auth { .. } => "auth",
            Self::Detection(_) => "detection",
            Self::Http(_) => "http",
            Self::Api(_) => "api",
            Self::Browser(_) => "browser",
        }
    }
}

/// One acquisition strategy in the fallback chain.
#[async_trait]
pub trait AcquisitionTier: Send {
    /// Tier name for logging and job records.
    fn name(&self) -> &'static str;

    /// Whether this tier performs live network acquisition. Live tiers are
    /// skipped while the safety breaker is open.
    fn is_live(&self) -> bool {
        true
    }

    /// Acquire raw payloads for a job.
    async fn acquire(&mut self, job: &AcquisitionJob) -> Result<Vec<RawPayload>, AcquireError>;

    /// Tear down and recreate long-lived resources (browser processes).
    async fn recycle(&mut self) {}
}

/// Result of driving a job through the tier chain.
pub struct ChainOutcome {
    pub payloads: Vec<RawPayload>,
    /// Name of the tier that produced the accepted batch.
    pub tier: &'static str,
    /// Whether any live tier ran, and if so whether one succeeded.
    pub live_outcome: Option<bool>,
    /// Classification of the last live-tier error, if any.
    pub last_error: Option<&'static str>,
}

/// Run the tier chain for a job.
///
/// Live tiers are skipped entirely when `skip_live` is set (breaker open).
/// A tier's batch is accepted when it reaches `min_results`; non-live tiers
/// terminate the chain with whatever they return.
pub async fn run_chain(
    tiers: &mut [Box<dyn AcquisitionTier>],
    job: &AcquisitionJob,
    min_results: usize,
    skip_live: bool,
) -> ChainOutcome {
    let mut live_ran = false;
    let mut last_error = None;

    for tier in tiers.iter_mut() {
        if tier.is_live() && skip_live {
            tracing::debug!("Skipping live tier {} (safety mode)", tier.name());
            continue;
        }

        let live = tier.is_live();
        if live {
            live_ran = true;
        }

        match tier.acquire(job).await {
            Ok(payloads) if payloads.len() >= min_results || !live => {
                tracing::info!(
                    "Tier {} produced {} payloads for job {}",
                    tier.name(),
                    payloads.len(),
                    job.id
                );
                return ChainOutcome {
                    payloads,
                    tier: tier.name(),
                    live_outcome: if live { Some(true) } else { live_ran.then_some(false) },
                    last_error,
                };
            }
            Ok(payloads) => {
                tracing::info!(
                    "Tier {} returned {} payloads (< {}), falling through",
                    tier.name(),
                    payloads.len(),
                    min_results
                );
            }
            Err(e) => {
                tracing::warn!("Tier {} failed for job {}: {}", tier.name(), job.id, e);
                last_error = Some(e.classification());
            }
        }
    }

    // The catalog tier never fails, so reaching this point means the chain
    // was configured without one. Return an empty terminal outcome.
    ChainOutcome {
        payloads: Vec::new(),
        tier: "none",
        live_outcome: live_ran.then_some(false),
        last_error,
    }
}
