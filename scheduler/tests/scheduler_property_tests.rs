// Property-based tests for scheduling behaviour

use chrono::{Duration as ChronoDuration, Utc};
use common::clock::{Clock, ManualClock};
use common::config::{DedupConfig, MarketplaceConfig, MessageConfig};
use common::copy::CopySelector;
use common::dedup::{DedupCache, MemoryDedupStore};
use common::errors::ConfigurationError;
use common::marketplace::HttpAdapterProvider;
use common::message::MessageFormatter;
use common::models::{
    Channel, ChannelType, Integration, IntegrationCredentials, JobConfig, SchedulerJob,
};
use common::publisher::ChannelRouter;
use common::scheduler::{
    EngineStores, JobState, JobTable, Pipeline, RunOutcome, Scheduler, SchedulerConfig,
    SchedulerEngine,
};
use common::store::{JobStore, MemoryStore};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn engine(store: Arc<MemoryStore>, clock: ManualClock) -> SchedulerEngine {
    let cache = DedupCache::new(
        Arc::new(MemoryDedupStore::new()),
        Arc::new(clock.clone()),
        &DedupConfig::default(),
    );
    let pipeline = Pipeline {
        adapters: Arc::new(HttpAdapterProvider::new(MarketplaceConfig::default())),
        cache,
        publisher: Arc::new(ChannelRouter::new()),
        formatter: MessageFormatter::new(MessageConfig::default()),
        copies: CopySelector::with_seed(store.clone(), 1),
    };
    SchedulerEngine::new(
        SchedulerConfig::default(),
        EngineStores::shared(store),
        pipeline,
        Arc::new(clock),
    )
}

/// Job whose only channel is inactive, so a run never reaches the marketplace
async fn idle_job(store: &MemoryStore, interval_minutes: u32) -> SchedulerJob {
    let integration = Integration {
        id: Uuid::new_v4(),
        name: "shopee".to_string(),
        credentials: IntegrationCredentials::Shopee {
            app_id: "1".to_string(),
            secret: "s".to_string(),
            affiliate_id: None,
        },
        is_active: true,
    };
    store.insert_integration(integration.clone()).await;

    let channel = Channel {
        id: Uuid::new_v4(),
        name: "promos".to_string(),
        channel_type: ChannelType::Telegram,
        address: "-100".to_string(),
        is_active: false,
    };
    store.insert_channel(channel.clone()).await;

    let job = SchedulerJob {
        id: Uuid::new_v4(),
        name: "fones".to_string(),
        integration_id: integration.id,
        interval_minutes,
        channel_ids: vec![channel.id],
        config: JobConfig {
            keywords: vec!["fone".to_string()],
            ..JobConfig::default()
        },
        is_active: true,
        last_run_at: None,
        next_run_at: None,
    };
    store.save(&job).await.unwrap();
    job
}

/// *For any* interval, a finished run schedules the next one exactly one interval
/// after completion, even when the run itself was skipped
#[test]
fn property_next_run_is_completion_plus_interval() {
    proptest!(|(
        interval_minutes in 1u32..1_440,
        offset_minutes in 0i64..10_000
    )| {
        runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let clock = ManualClock::new(Utc::now() + ChronoDuration::minutes(offset_minutes));
            let job = idle_job(&store, interval_minutes).await;
            let engine = engine(store.clone(), clock.clone());

            let report = engine.trigger_job(job.id).await.unwrap();

            prop_assert_eq!(
                report.outcome,
                RunOutcome::Skipped(ConfigurationError::NoActiveChannels(job.id))
            );
            let expected = clock.now() + ChronoDuration::minutes(interval_minutes as i64);
            prop_assert_eq!(report.next_run_at, Some(expected));

            let stored = JobStore::find(store.as_ref(), job.id).await.unwrap().unwrap();
            prop_assert_eq!(stored.next_run_at, Some(expected));
            prop_assert_eq!(stored.last_run_at, Some(clock.now()));
            Ok::<(), TestCaseError>(())
        })?;
    });
}

/// *For any* elapsed time, a job is picked up by a poll only once its next run is due
#[test]
fn property_poll_respects_next_run() {
    proptest!(|(
        interval_minutes in 1u32..240,
        elapsed_minutes in 0i64..480
    )| {
        runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let clock = ManualClock::new(Utc::now());
            idle_job(&store, interval_minutes).await;
            let engine = engine(store, clock.clone());

            prop_assert_eq!(engine.process_due_jobs().await.unwrap(), 1);

            clock.advance(ChronoDuration::minutes(elapsed_minutes));
            let expected = usize::from(elapsed_minutes >= interval_minutes as i64);
            prop_assert_eq!(engine.process_due_jobs().await.unwrap(), expected);
            Ok::<(), TestCaseError>(())
        })?;
    });
}

/// *For any* sequence of begin/release operations, a job is never running twice
#[test]
fn property_job_table_single_runner() {
    proptest!(|(ops in prop::collection::vec(any::<bool>(), 1..40))| {
        let table = JobTable::new();
        let job_id = Uuid::new_v4();
        let mut slot = None;

        for begin in ops {
            if begin {
                let attempt = table.begin(job_id);
                prop_assert_eq!(attempt.is_some(), slot.is_none());
                if attempt.is_some() {
                    slot = attempt;
                }
                prop_assert!(!table.mark_due(job_id));
            } else {
                slot = None;
                prop_assert_eq!(table.state(job_id), JobState::Idle);
            }
            prop_assert!(table.running_count() <= 1);
        }
    });
}

/// Stopping an engine with nothing in flight returns promptly and ends the loop
#[tokio::test]
async fn test_stop_ends_poll_loop() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(engine(store, ManualClock::new(Utc::now())));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.stop().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("poll loop did not stop")
        .unwrap();
    assert!(result.is_ok());
}
