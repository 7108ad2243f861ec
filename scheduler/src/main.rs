// Scheduler binary entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::clock::{Clock, SystemClock};
use common::config::{DedupBackend, Settings};
use common::copy::CopySelector;
use common::db::repositories::{
    CatalogRepository, ChannelRepository, IntegrationRepository, JobRepository,
};
use common::db::{DbPool, RedisPool};
use common::dedup::{DedupCache, DedupStore, MemoryDedupStore, RedisDedupStore};
use common::lock::{DistributedLock, RedLock};
use common::marketplace::HttpAdapterProvider;
use common::message::MessageFormatter;
use common::models::ChannelType;
use common::publisher::{ChannelRouter, TelegramPublisher};
use common::scheduler::{EngineStores, Pipeline, Scheduler, SchedulerConfig, SchedulerEngine};
use common::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "scheduler", version, about = "Marketplace promotion scheduler")]
struct Cli {
    /// Directory holding default.toml and local.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for due jobs until interrupted (default)
    Run,
    /// Run a single job now
    Trigger { job_id: Uuid },
    /// Evict dedup records whose item key matches a glob
    ClearCache {
        #[arg(long, default_value = "*")]
        scope: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from_path(&cli.config_dir)
        .with_context(|| format!("Failed to load configuration from {}", cli.config_dir.display()))?;
    settings
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    telemetry::init_logging(&settings.observability)?;

    info!(
        dedup_backend = ?settings.dedup.backend,
        distributed_lock = settings.scheduler.distributed_lock,
        "Configuration loaded"
    );

    let needs_redis =
        settings.dedup.backend == DedupBackend::Redis || settings.scheduler.distributed_lock;
    let redis_pool = if needs_redis {
        Some(
            RedisPool::new(&settings.redis)
                .await
                .context("Failed to initialize Redis pool")?,
        )
    } else {
        None
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = build_cache(&settings, redis_pool.as_ref(), clock.clone())?;

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::ClearCache { scope } => {
            let removed = cache.clear_all(&scope).await?;
            info!(scope = %scope, removed, "Dedup cache cleared");
            println!("{}", removed);
            Ok(())
        }
        Command::Trigger { job_id } => {
            let engine = build_engine(&settings, redis_pool, cache, clock).await?;
            let report = engine.trigger_job(job_id).await?;
            info!(
                job_id = %report.job_id,
                outcome = ?report.outcome,
                items_sent = report.items_sent,
                "Manual run finished"
            );
            Ok(())
        }
        Command::Run => {
            telemetry::init_metrics(settings.observability.metrics_port)?;
            let engine = Arc::new(build_engine(&settings, redis_pool, cache, clock).await?);

            let for_shutdown = engine.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown"),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
                }
                if let Err(e) = for_shutdown.stop().await {
                    error!(error = %e, "Error during scheduler shutdown");
                }
            });

            engine.start().await.map_err(anyhow::Error::from)
        }
    };

    telemetry::shutdown_tracer();
    result
}

fn build_cache(
    settings: &Settings,
    redis_pool: Option<&RedisPool>,
    clock: Arc<dyn Clock>,
) -> Result<DedupCache> {
    let store: Arc<dyn DedupStore> = match (settings.dedup.backend, redis_pool) {
        (DedupBackend::Redis, Some(pool)) => Arc::new(RedisDedupStore::new(pool.clone())),
        (DedupBackend::Redis, None) => anyhow::bail!("Redis dedup backend requires a Redis pool"),
        (DedupBackend::Memory, _) => {
            warn!("Using in-memory dedup cache; sent items are forgotten on restart");
            Arc::new(MemoryDedupStore::new())
        }
    };
    Ok(DedupCache::new(store, clock, &settings.dedup))
}

async fn build_engine(
    settings: &Settings,
    redis_pool: Option<RedisPool>,
    cache: DedupCache,
    clock: Arc<dyn Clock>,
) -> Result<SchedulerEngine> {
    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    let catalog = Arc::new(CatalogRepository::new(db_pool.clone()));
    let stores = EngineStores {
        jobs: Arc::new(JobRepository::new(db_pool.clone())),
        integrations: Arc::new(IntegrationRepository::new(db_pool.clone())),
        channels: Arc::new(ChannelRepository::new(db_pool)),
        catalog: catalog.clone(),
    };

    let publish_timeout = Duration::from_secs(settings.scheduler.publish_timeout_seconds);
    let mut router = ChannelRouter::new();
    match TelegramPublisher::from_config(&settings.telegram, publish_timeout)? {
        Some(telegram) => router = router.register(ChannelType::Telegram, Arc::new(telegram)),
        None => warn!("No Telegram bot token configured; Telegram channels will fail"),
    }

    let pipeline = Pipeline {
        adapters: Arc::new(HttpAdapterProvider::new(settings.marketplace.clone())),
        cache,
        publisher: Arc::new(router),
        formatter: MessageFormatter::new(settings.message.clone()),
        copies: CopySelector::new(catalog),
    };

    let engine = SchedulerEngine::new(SchedulerConfig::from(settings), stores, pipeline, clock);

    match (settings.scheduler.distributed_lock, redis_pool) {
        (true, Some(pool)) => {
            let lock: Arc<dyn DistributedLock> = Arc::new(RedLock::new(pool));
            info!("Distributed run lock enabled");
            Ok(engine.with_lock(lock))
        }
        _ => Ok(engine),
    }
}
