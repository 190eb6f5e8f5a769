//! CLI commands implementation.

use clap::{Parser, Subcommand};
use console::style;

use crate::config::CrawlerConfig;
use crate::coordination::{CoordinationStore, RedisStore, SafetyBreaker};
use crate::models::{AcquisitionJob, JobKind};
use crate::repository::{AsyncSqlitePool, ProductRepository};
use crate::scrapers::ProxyPool;
use crate::services::{JobQueue, JobWorker};

#[derive(Parser)]
#[command(name = "trend")]
#[command(about = "Trending product acquisition and discovery crawler")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition worker loop
    Worker,

    /// Enqueue an acquisition job
    Enqueue {
        /// Job kind: refresh_batch, category, or trending
        kind: String,
        /// Target category (for category jobs)
        #[arg(short, long)]
        category: Option<String>,
        /// Maximum records to acquire
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show breaker, queue, and storage status
    Status {
        /// Show status for a specific job id
        #[arg(long)]
        job: Option<String>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CrawlerConfig::from_env();

    match cli.command {
        Commands::Worker => {
            let mut worker = JobWorker::build(config).await?;
            worker.run().await
        }
        Commands::Enqueue {
            kind,
            category,
            limit,
        } => enqueue(&config, &kind, category, limit).await,
        Commands::Status { job } => status(&config, job.as_deref()).await,
    }
}

async fn enqueue(
    config: &CrawlerConfig,
    kind: &str,
    category: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let kind = JobKind::from_str(kind)
        .ok_or_else(|| anyhow::anyhow!("unknown job kind '{}' (expected refresh_batch, category, or trending)", kind))?;

    if kind == JobKind::Category && category.is_none() {
        anyhow::bail!("category jobs require --category");
    }

    let store = RedisStore::connect(&config.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
    let queue = JobQueue::new(store.connection());

    let job = AcquisitionJob::new(kind, category, limit);
    queue.enqueue(&job).await?;

    println!("{} job {}", style("Enqueued").green().bold(), job.id);
    Ok(())
}

async fn status(config: &CrawlerConfig, job_id: Option<&str>) -> anyhow::Result<()> {
    let store = RedisStore::connect(&config.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
    let queue = JobQueue::new(store.connection());

    if let Some(id) = job_id {
        let fields = queue.job_status(id).await?;
        if fields.is_empty() {
            println!("{} job {} not found", style("!").yellow(), id);
            return Ok(());
        }
        println!("{}", style(format!("Job {}", id)).bold());
        let mut keys: Vec<_> = fields.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {:<16} {}", key, fields[key]);
        }
        return Ok(());
    }

    let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(store);
    let breaker = SafetyBreaker::new(
        store,
        config.failure_threshold,
        std::time::Duration::from_secs(config.safety_cooldown_secs),
    );
    let safety = breaker.status().await;

    println!("{}", style("Safety breaker").bold());
    if safety.open {
        println!(
            "  state            {} (until {})",
            style("open").red(),
            safety
                .open_until
                .map(|u| u.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
    } else {
        println!("  state            {}", style("closed").green());
    }
    println!("  failures         {}", safety.consecutive_failures);

    println!("{}", style("Queue").bold());
    println!("  pending jobs     {}", queue.depth().await?);

    println!("{}", style("Proxies").bold());
    let pool = ProxyPool::new(config.proxy_endpoints());
    let stats = pool.stats();
    println!("  configured       {}", stats.total);

    let db_path = config.database_path();
    if db_path.exists() {
        let repo = ProductRepository::new(AsyncSqlitePool::from_path(&db_path));
        println!("{}", style("Storage").bold());
        println!("  products         {}", repo.count().await?);
    }

    Ok(())
}
