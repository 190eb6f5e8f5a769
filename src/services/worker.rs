//! The job worker loop.
//!
//! Pulls acquisition jobs from the queue one at a time, consults the
//! safety breaker once per job, drives the tier chain, persists normalized
//! records, and reports job status. Browser-capable tiers are torn down
//! and recreated on a schedule to bound memory growth. Shutdown is
//! cooperative: the current job finishes, then resources are released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::queue::{JobMessage, JobQueue};
use crate::config::CrawlerConfig;
use crate::coordination::{CoordinationStore, RedisStore, SafetyBreaker};
use crate::models::CanonicalProduct;
use crate::normalizer;
use crate::repository::{AsyncSqlitePool, ProductRepository};
use crate::scrapers::direct::DirectTierConfig;
#[cfg(feature = "browser")]
use crate::scrapers::BrowserTierConfig;
use crate::scrapers::{
    run_chain, AcquisitionTier, CatalogTier, DirectApiTier, ProxyPool, RateLimitConfig,
    RetryPolicy,
};

/// Jobs to keep the direct tier benched after a detection hit.
const DETECTION_PENALTY_JOBS: usize = 3;

/// Long-running worker processing acquisition jobs.
pub struct JobWorker {
    config: CrawlerConfig,
    queue: JobQueue,
    breaker: SafetyBreaker,
    tiers: Vec<Box<dyn AcquisitionTier>>,
    products: ProductRepository,
    jobs_processed: usize,
    /// Remaining jobs for which the direct tier is skipped after detection.
    direct_penalty: usize,
    shutdown: Arc<AtomicBool>,
}

impl JobWorker {
    /// Construct a worker: connect coordination, build tiers, prepare storage.
    pub async fn build(config: CrawlerConfig) -> anyhow::Result<Self> {
        let store = RedisStore::connect(&config.redis_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
        let queue = JobQueue::new(store.connection());

        let store: Arc<dyn CoordinationStore> = Arc::new(store);
        let breaker = SafetyBreaker::new(
            store.clone(),
            config.failure_threshold,
            Duration::from_secs(config.safety_cooldown_secs),
        );

        let rate_limit = RateLimitConfig {
            requests_per_window: config.requests_per_window,
            window: Duration::from_secs(config.rate_window_secs),
            ..Default::default()
        };

        let direct = DirectApiTier::new(
            config.session_tokens(),
            store.clone(),
            DirectTierConfig {
                timeout: config.request_timeout(),
                retry: RetryPolicy::new(config.max_retries, Duration::from_secs(1)),
                rate_limit,
            },
        );

        #[cfg(feature = "browser")]
        let proxies = Arc::new(Mutex::new(ProxyPool::new(config.proxy_endpoints())));
        #[cfg(not(feature = "browser"))]
        let _proxies = Arc::new(Mutex::new(ProxyPool::new(config.proxy_endpoints())));

        let mut tiers: Vec<Box<dyn AcquisitionTier>> = vec![Box::new(direct)];

        #[cfg(feature = "browser")]
        {
            use crate::scrapers::RenderedBrowserTier;
            tiers.push(Box::new(RenderedBrowserTier::new(
                BrowserTierConfig {
                    headless: config.headless,
                    navigation_timeout: config.navigation_timeout(),
                    chrome_args: Vec::new(),
                },
                proxies,
            )));
        }

        tiers.push(Box::new(CatalogTier::new()));

        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let products = ProductRepository::new(AsyncSqlitePool::from_path(&db_path));
        products
            .ensure_schema()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to prepare database: {}", e))?;

        Ok(Self {
            config,
            queue,
            breaker,
            tiers,
            products,
            jobs_processed: 0,
            direct_penalty: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked at the top of the loop; exposed so a signal task or a
    /// test can request a stop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Install SIGINT/SIGTERM handlers that request cooperative shutdown.
    fn install_signal_handlers(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        let _ = ctrl_c.await;
                        shutdown.store(true, Ordering::SeqCst);
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }

            info!("Shutdown requested, finishing current job");
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    /// Run until shutdown is requested.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Worker starting, waiting for jobs");
        self.install_signal_handlers();

        while !self.shutdown.load(Ordering::SeqCst) {
            // Scheduled recycle bounds memory growth in rendering processes
            if self.jobs_processed >= self.config.recycle_after_jobs {
                info!(
                    "Recycling tiers after {} jobs",
                    self.jobs_processed
                );
                for tier in &mut self.tiers {
                    tier.recycle().await;
                }
                self.jobs_processed = 0;
            }

            let message = match self.queue.pop(Duration::from_secs(5)).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    error!("Queue error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            self.process_message(message).await;
            self.jobs_processed += 1;
        }

        // Release browser resources before exit
        for tier in &mut self.tiers {
            tier.recycle().await;
        }
        info!("Worker stopped");
        Ok(())
    }

    /// Process one queue message end to end.
    ///
    /// A failure anywhere here marks the job failed and returns; it never
    /// terminates the worker loop.
    async fn process_message(&mut self, message: JobMessage) {
        let job_id = message.id.clone();
        info!("Processing job {} ({})", job_id, message.job_type);

        if let Err(e) = self.queue.mark_running(&job_id).await {
            warn!("Failed to mark job {} running: {}", job_id, e);
        }

        let job = match message.classify() {
            Ok(job) => job,
            Err(reason) => {
                warn!("Job {} rejected: {}", job_id, reason);
                let _ = self
                    .queue
                    .mark_failed(&job_id, &format!("classification: {}", reason))
                    .await;
                return;
            }
        };

        // One breaker consultation per job, not per tier call
        let skip_live = self.breaker.is_open().await;
        if skip_live {
            info!("Safety mode active, serving job {} synthetically", job_id);
        }

        // Detection bias: bench the direct tier for a few jobs after a hit
        let tiers = if self.direct_penalty > 0 && !skip_live && self.tiers.len() > 1 {
            self.direct_penalty -= 1;
            &mut self.tiers[1..]
        } else {
            &mut self.tiers[..]
        };

        let outcome = run_chain(tiers, &job, self.config.min_results, skip_live).await;

        match outcome.live_outcome {
            Some(true) => self.breaker.record_success().await,
            Some(false) => self.breaker.record_failure().await,
            None => {}
        }

        if outcome.last_error == Some("detection") {
            self.direct_penalty = DETECTION_PENALTY_JOBS;
        }

        // Per-record parse failures are skipped, never escalated
        let products: Vec<CanonicalProduct> = outcome
            .payloads
            .iter()
            .filter_map(normalizer::normalize)
            .collect();
        let dropped = outcome.payloads.len() - products.len();
        if dropped > 0 {
            info!("Skipped {} unparseable records for job {}", dropped, job_id);
        }

        match self.products.upsert_products(&products).await {
            Ok(saved) => {
                info!(
                    "Job {} completed: {} records saved via {}",
                    job_id, saved, outcome.tier
                );
                if let Err(e) = self.queue.mark_completed(&job_id, saved, outcome.tier).await {
                    warn!("Failed to mark job {} completed: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed to persist records: {}", job_id, e);
                let _ = self
                    .queue
                    .mark_failed(&job_id, &format!("storage: {}", e))
                    .await;
            }
        }
    }
}
