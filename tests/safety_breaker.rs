//! Safety breaker behavior across simulated jobs and workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use trendacquire::coordination::{CoordinationStore, MemoryStore, SafetyBreaker};
use trendacquire::models::{AcquisitionJob, JobKind, RawPayload};
use trendacquire::scrapers::{run_chain, AcquireError, AcquisitionTier, CatalogTier};

struct AuthFailingTier {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AcquisitionTier for AuthFailingTier {
    fn name(&self) -> &'static str {
        "direct_api"
    }

    async fn acquire(&mut self, _job: &AcquisitionJob) -> Result<Vec<RawPayload>, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AcquireError::Auth { status: 401 })
    }
}

/// Drive one job the way the worker does: check the breaker once, run the
/// chain, record the live outcome.
async fn run_job(
    breaker: &SafetyBreaker,
    calls: Arc<AtomicUsize>,
) -> (&'static str, bool) {
    let skip_live = breaker.is_open().await;

    let mut tiers: Vec<Box<dyn AcquisitionTier>> = vec![
        Box::new(AuthFailingTier { calls }),
        Box::new(CatalogTier::new()),
    ];
    let job = AcquisitionJob::new(JobKind::Trending, None, 10);
    let outcome = run_chain(&mut tiers, &job, 5, skip_live).await;

    match outcome.live_outcome {
        Some(true) => breaker.record_success().await,
        Some(false) => breaker.record_failure().await,
        None => {}
    }

    (outcome.tier, skip_live)
}

#[tokio::test]
async fn five_auth_failures_trip_the_breaker_exactly_once() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let breaker = SafetyBreaker::new(store.clone(), 5, Duration::from_secs(3600));
    let calls = Arc::new(AtomicUsize::new(0));

    // Five jobs fail against the direct tier; each still completes via the
    // catalog tier
    for i in 0..5 {
        let (tier, skipped) = run_job(&breaker, calls.clone()).await;
        assert_eq!(tier, "catalog");
        assert!(!skipped, "breaker opened early on job {}", i);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(breaker.is_open().await);

    // A sixth job, as any concurrent worker sharing the store would see it,
    // observes open state and performs no network call
    let (tier, skipped) = run_job(&breaker, calls.clone()).await;
    assert!(skipped);
    assert_eq!(tier, "catalog");
    assert_eq!(calls.load(Ordering::SeqCst), 5, "no further live attempts");

    // The breaker tripped exactly once: the cooldown timestamp is a single
    // stable value, not re-extended by the sixth job
    let status = breaker.status().await;
    assert!(status.open);
    assert_eq!(status.consecutive_failures, 5);
}

#[tokio::test]
async fn breaker_state_is_shared_across_workers() {
    // Two breakers over one store stand in for two worker processes
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let worker_a = SafetyBreaker::new(store.clone(), 3, Duration::from_secs(3600));
    let worker_b = SafetyBreaker::new(store.clone(), 3, Duration::from_secs(3600));

    worker_a.record_failure().await;
    worker_b.record_failure().await;
    worker_a.record_failure().await;

    assert!(worker_a.is_open().await);
    assert!(worker_b.is_open().await);
}

#[tokio::test]
async fn breaker_closes_after_cooldown_and_live_tiers_resume() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let breaker = SafetyBreaker::new(store, 2, Duration::from_millis(30));
    let calls = Arc::new(AtomicUsize::new(0));

    run_job(&breaker, calls.clone()).await;
    run_job(&breaker, calls.clone()).await;
    assert!(breaker.is_open().await);

    tokio::time::sleep(Duration::from_millis(60)).await;

    // Cooldown elapsed: live tiers are attempted again
    let (_, skipped) = run_job(&breaker, calls.clone()).await;
    assert!(!skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
