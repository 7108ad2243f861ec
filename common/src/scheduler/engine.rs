// Scheduler engine: polls due jobs and runs search -> filter -> publish for each

use super::job_table::JobTable;
use crate::clock::Clock;
use crate::config::Settings;
use crate::copy::CopySelector;
use crate::dedup::DedupCache;
use crate::errors::{ConfigurationError, PublishError, RunError, StorageError};
use crate::filter::{FilterCriteria, FilterPipeline};
use crate::finder::{NewItemFinder, DEFAULT_MAX_PAGE_ATTEMPTS};
use crate::lock::DistributedLock;
use crate::marketplace::{AdapterProvider, SearchQuery};
use crate::message::{MessageFormatter, OutboundMessage};
use crate::models::{Candidate, CatalogEntry, Channel, SchedulerJob, DEFAULT_MIN_RATING};
use crate::publisher::ChannelPublisher;
use crate::store::{CatalogStore, ChannelStore, IntegrationStore, JobStore};
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How long `stop` waits for an in-flight run to finish
const STOP_GRACE_SECONDS: u64 = 30;

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll for jobs due (in seconds)
    pub poll_interval_seconds: u64,
    /// TTL of the per-job run lock (in seconds)
    pub run_lock_ttl_seconds: u64,
    /// Maximum number of jobs to run per poll
    pub max_jobs_per_poll: usize,
    /// Upper bound for a single channel publish call
    pub publish_timeout_seconds: u64,
    pub max_page_attempts: u32,
    /// Rating threshold for jobs that do not set `min_rating`
    pub default_min_rating: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            run_lock_ttl_seconds: 900,
            max_jobs_per_poll: 100,
            publish_timeout_seconds: 20,
            max_page_attempts: DEFAULT_MAX_PAGE_ATTEMPTS,
            default_min_rating: DEFAULT_MIN_RATING,
        }
    }
}

impl From<&Settings> for SchedulerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval_seconds: settings.scheduler.poll_interval_seconds,
            run_lock_ttl_seconds: settings.scheduler.run_lock_ttl_seconds,
            max_jobs_per_poll: settings.scheduler.max_jobs_per_poll,
            publish_timeout_seconds: settings.scheduler.publish_timeout_seconds,
            max_page_attempts: settings.marketplace.max_page_attempts,
            default_min_rating: settings.filters.default_min_rating,
        }
    }
}

/// Read side of the CRUD-owned data
#[derive(Clone)]
pub struct EngineStores {
    pub jobs: Arc<dyn JobStore>,
    pub integrations: Arc<dyn IntegrationStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub catalog: Arc<dyn CatalogStore>,
}

impl EngineStores {
    /// All four stores backed by one implementation
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + IntegrationStore + ChannelStore + CatalogStore + 'static,
    {
        Self {
            jobs: store.clone(),
            integrations: store.clone(),
            channels: store.clone(),
            catalog: store,
        }
    }
}

/// Collaborators of a single job run
pub struct Pipeline {
    pub adapters: Arc<dyn AdapterProvider>,
    pub cache: DedupCache,
    pub publisher: Arc<dyn ChannelPublisher>,
    pub formatter: MessageFormatter,
    pub copies: CopySelector,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// The run was abandoned before searching; the job was still rescheduled
    Skipped(ConfigurationError),
    /// Another scheduler instance holds the run lock; nothing was touched
    LockHeld,
}

/// Summary of one job run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job_id: Uuid,
    pub outcome: RunOutcome,
    /// Candidates that passed every check and went to dispatch
    pub accepted: usize,
    /// Items delivered to at least one channel
    pub items_sent: usize,
    pub deliveries: usize,
    pub publish_failures: usize,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            outcome: RunOutcome::Completed,
            accepted: 0,
            items_sent: 0,
            deliveries: 0,
            publish_failures: 0,
            next_run_at: None,
        }
    }

    fn skipped(job_id: Uuid, reason: ConfigurationError) -> Self {
        Self {
            outcome: RunOutcome::Skipped(reason),
            ..Self::new(job_id)
        }
    }
}

/// Scheduler trait for job scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the polling loop; returns after `stop`
    async fn start(&self) -> Result<(), RunError>;

    /// Stop the polling loop, waiting for an in-flight run to finish
    async fn stop(&self) -> Result<(), RunError>;

    /// Run every due job once, sequentially; returns how many ran
    async fn process_due_jobs(&self) -> Result<usize, RunError>;

    /// Run one job now, whether or not it is due
    async fn trigger_job(&self, job_id: Uuid) -> Result<RunReport, RunError>;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    stores: EngineStores,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    lock: Option<Arc<dyn DistributedLock>>,
    table: JobTable,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        stores: EngineStores,
        pipeline: Pipeline,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            stores,
            pipeline,
            clock,
            lock: None,
            table: JobTable::new(),
            shutdown_tx,
        }
    }

    /// Guard every run with a lock shared by all scheduler instances
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn job_table(&self) -> &JobTable {
        &self.table
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run a job and persist its new schedule, whatever happened during the run
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn execute(&self, job: &SchedulerJob) -> Result<RunReport, RunError> {
        let Some(_slot) = self.table.begin(job.id) else {
            return Err(RunError::AlreadyRunning(job.id));
        };

        let _guard = match &self.lock {
            Some(lock) => {
                let resource = format!("run:job:{}", job.id);
                let ttl = Duration::from_secs(self.config.run_lock_ttl_seconds);
                match lock.try_acquire(&resource, ttl).await? {
                    Some(guard) => Some(guard),
                    None => {
                        info!("Run lock held by another scheduler instance, skipping");
                        return Ok(RunReport {
                            outcome: RunOutcome::LockHeld,
                            ..RunReport::new(job.id)
                        });
                    }
                }
            }
            None => None,
        };

        let started = Instant::now();
        let result = self.run_job(job).await;

        let finished_at = self.clock.now();
        let next_run_at = job.next_run_after(finished_at);
        self.stores
            .jobs
            .record_run(job.id, finished_at, next_run_at)
            .await?;

        telemetry::record_job_duration(&job.id, &job.name, started.elapsed().as_secs_f64());

        let mut report = match result {
            Ok(report) => report,
            Err(RunError::Configuration(reason)) => {
                match &reason {
                    ConfigurationError::NoActiveChannels(_)
                    | ConfigurationError::NoCatalogEntries(_) => {
                        info!(reason = %reason, "Nothing to do for job, skipping run");
                    }
                    other => {
                        warn!(error = %other, "Job run aborted by configuration error");
                        telemetry::record_job_failure(&job.id, &job.name, "configuration");
                    }
                }
                RunReport::skipped(job.id, reason)
            }
            Err(e) => {
                error!(error = %e, "Job run failed");
                telemetry::record_job_failure(&job.id, &job.name, "storage");
                return Err(e);
            }
        };

        telemetry::record_job_run(&job.id, &job.name, report.items_sent);
        report.next_run_at = Some(next_run_at);

        info!(
            accepted = report.accepted,
            items_sent = report.items_sent,
            deliveries = report.deliveries,
            publish_failures = report.publish_failures,
            next_run_at = %next_run_at,
            "Job run finished"
        );

        Ok(report)
    }

    async fn run_job(&self, job: &SchedulerJob) -> Result<RunReport, RunError> {
        let channels = self.stores.channels.active_channels(&job.channel_ids).await?;
        if channels.is_empty() {
            return Err(ConfigurationError::NoActiveChannels(job.id).into());
        }
        let channel_ids: Vec<Uuid> = channels.iter().map(|c| c.id).collect();

        let (keywords, entries) = self.resolve_search_terms(job, &channel_ids).await?;
        if keywords.is_empty() {
            return Err(ConfigurationError::NoCatalogEntries(job.id).into());
        }

        let integration = self
            .stores
            .integrations
            .find(job.integration_id)
            .await?
            .ok_or(ConfigurationError::IntegrationNotFound(job.integration_id))?;
        let adapter = self.pipeline.adapters.adapter_for(&integration)?;
        let finder = NewItemFinder::new(
            adapter,
            self.pipeline.cache.clone(),
            self.config.max_page_attempts,
        );

        let mut filter = FilterPipeline::new(FilterCriteria::from_config(
            &job.config,
            self.config.default_min_rating,
        ));
        let target = job.config.limit as usize;
        let mut report = RunReport::new(job.id);

        for keyword in &keywords {
            if report.accepted >= target {
                debug!("Target reached, skipping remaining keywords");
                break;
            }

            let query = SearchQuery::for_job(keyword.clone(), &job.config);
            // Items taken by an earlier keyword must not use up this keyword's budget
            let candidates = finder
                .find_new_matching(&query, target - report.accepted, |c| filter.would_admit(c))
                .await?;

            let entry = entries.iter().find(|e| e.matches_keyword(keyword));

            for candidate in candidates {
                if report.accepted >= target {
                    break;
                }
                if let Err(rejection) = filter.admit(&candidate) {
                    debug!(
                        item_id = %candidate.item_id,
                        reason = rejection.reason(),
                        "Candidate filtered out"
                    );
                    continue;
                }
                if !self.price_allows_send(&candidate).await {
                    continue;
                }

                report.accepted += 1;
                self.dispatch(&candidate, entry, &channels, &mut report).await;
            }
        }

        Ok(report)
    }

    /// Keywords for the run, in configured order, and the catalog entries backing them.
    ///
    /// Jobs with catalog entry ids search by entry name. Older jobs search their
    /// free-text keywords; entries with the same name still provide copy.
    async fn resolve_search_terms(
        &self,
        job: &SchedulerJob,
        channel_ids: &[Uuid],
    ) -> Result<(Vec<String>, Vec<CatalogEntry>), StorageError> {
        let catalog = &self.stores.catalog;

        if job.config.uses_catalog() {
            let entries = catalog
                .entries_by_ids(&job.config.catalog_entry_ids, channel_ids)
                .await?;
            let keywords = entries.iter().map(|e| e.name.trim().to_string()).collect();
            return Ok((keywords, entries));
        }

        let keywords: Vec<String> = job
            .config
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let entries = catalog.entries_by_names(&keywords, channel_ids).await?;
        Ok((keywords, entries))
    }

    /// Per-run price validation. Cache errors skip the item rather than guess.
    async fn price_allows_send(&self, candidate: &Candidate) -> bool {
        match self
            .pipeline
            .cache
            .resend_on_price_change(&candidate.item_id, candidate.price)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(item_id = %candidate.item_id, "Already sent at this price");
                false
            }
            Err(e) => {
                warn!(item_id = %candidate.item_id, error = %e, "Dedup cache check failed, skipping item");
                telemetry::record_cache_error("run");
                false
            }
        }
    }

    /// Publish one item to every channel; the ledger is written once, on the first success
    #[instrument(skip_all, fields(item_id = %candidate.item_id))]
    async fn dispatch(
        &self,
        candidate: &Candidate,
        entry: Option<&CatalogEntry>,
        channels: &[Channel],
        report: &mut RunReport,
    ) {
        let copy = match entry {
            Some(entry) => match self.pipeline.cache.used_copy_ids(&candidate.item_id).await {
                Ok(used) => match self.pipeline.copies.select(entry, &used).await {
                    Ok(copy) => copy,
                    Err(e) => {
                        warn!(error = %e, "Copy lookup failed, sending without hook");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Used copy lookup failed, sending without hook");
                    telemetry::record_cache_error("run");
                    None
                }
            },
            None => None,
        };
        let hook = copy.as_ref().map(|c| c.text.as_str());
        let copy_id = copy.as_ref().map(|c| c.id);

        let mut recorded = false;
        for channel in channels {
            let message = self.pipeline.formatter.format(
                candidate,
                hook,
                channel.channel_type.markup_format(),
            );

            match self.publish(channel, &message).await {
                Ok(()) => {
                    report.deliveries += 1;
                    debug!(channel_id = %channel.id, "Item published");
                    if !recorded {
                        recorded = true;
                        if let Err(e) = self
                            .pipeline
                            .cache
                            .record(
                                &candidate.item_id,
                                candidate.price,
                                candidate.original_price,
                                copy_id,
                            )
                            .await
                        {
                            warn!(error = %e, "Failed to record sent item");
                            telemetry::record_cache_error("record");
                        }
                    }
                }
                Err(e) => {
                    report.publish_failures += 1;
                    warn!(
                        channel_id = %channel.id,
                        channel_type = %channel.channel_type,
                        error = %e,
                        "Publish failed"
                    );
                    telemetry::record_publish_failure(
                        &channel.channel_type.to_string(),
                        publish_failure_reason(&e),
                    );
                }
            }
        }

        if recorded {
            report.items_sent += 1;
        }
    }

    async fn publish(
        &self,
        channel: &Channel,
        message: &OutboundMessage,
    ) -> Result<(), PublishError> {
        let limit = Duration::from_secs(self.config.publish_timeout_seconds);
        match tokio::time::timeout(limit, self.pipeline.publisher.publish(channel, message)).await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(limit.as_secs())),
        }
    }
}

fn publish_failure_reason(err: &PublishError) -> &'static str {
    match err {
        PublishError::Unsupported(_) => "unsupported",
        PublishError::MisconfiguredChannel(..) => "misconfigured",
        PublishError::Timeout(_) => "timeout",
        PublishError::Transport(_) => "transport",
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), RunError> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            distributed_lock = self.lock.is_some(),
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_seconds));
        // A long run must not cause a burst of catch-up ticks
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due_jobs().await {
                        Ok(count) if count > 0 => info!(jobs_processed = count, "Processed due jobs"),
                        Ok(_) => debug!("No jobs due"),
                        Err(e) => error!(error = %e, "Error processing due jobs"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), RunError> {
        info!("Stopping scheduler engine");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + Duration::from_secs(STOP_GRACE_SECONDS);
        while self.table.running_count() > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
        }
        if self.table.running_count() > 0 {
            warn!("Stopped with a job run still in flight");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn process_due_jobs(&self) -> Result<usize, RunError> {
        let now = self.clock.now();
        let due: Vec<SchedulerJob> = self
            .stores
            .jobs
            .active_jobs()
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .take(self.config.max_jobs_per_poll)
            .collect();

        telemetry::update_jobs_due(due.len());
        debug!(job_count = due.len(), "Found due jobs");

        let due: Vec<SchedulerJob> = due
            .into_iter()
            .filter(|job| {
                let marked = self.table.mark_due(job.id);
                if !marked {
                    debug!(job_id = %job.id, "Job still running from a previous tick");
                }
                marked
            })
            .collect();

        let mut processed = 0;
        for job in &due {
            match self.execute(job).await {
                Ok(report) if report.outcome == RunOutcome::LockHeld => {}
                Ok(_) => processed += 1,
                Err(RunError::AlreadyRunning(_)) => {}
                Err(e) => {
                    error!(job_id = %job.id, job_name = %job.name, error = %e, "Failed to run job");
                }
            }
        }

        Ok(processed)
    }

    #[instrument(skip(self))]
    async fn trigger_job(&self, job_id: Uuid) -> Result<RunReport, RunError> {
        let job = self
            .stores
            .jobs
            .find(job_id)
            .await?
            .ok_or(RunError::JobNotFound(job_id))?;

        info!(job_name = %job.name, "Manual trigger");
        self.execute(&job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.run_lock_ttl_seconds, 900);
        assert_eq!(config.max_jobs_per_poll, 100);
        assert_eq!(config.max_page_attempts, 50);
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let mut settings = Settings::default();
        settings.scheduler.poll_interval_seconds = 2;
        settings.scheduler.publish_timeout_seconds = 7;
        settings.marketplace.max_page_attempts = 9;
        settings.filters.default_min_rating = 4.0;

        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.poll_interval_seconds, 2);
        assert_eq!(config.publish_timeout_seconds, 7);
        assert_eq!(config.max_page_attempts, 9);
        assert_eq!(config.default_min_rating, 4.0);
    }

    #[test]
    fn test_publish_failure_reason() {
        assert_eq!(
            publish_failure_reason(&PublishError::Unsupported("instagram".to_string())),
            "unsupported"
        );
        assert_eq!(publish_failure_reason(&PublishError::Timeout(20)), "timeout");
    }
}
