// Property-based tests for the dedup ledger policies

use chrono::{Duration, Utc};
use common::clock::ManualClock;
use common::config::DedupConfig;
use common::dedup::{DedupCache, MemoryDedupStore};
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

fn cache(ttl_days: i64) -> (DedupCache, ManualClock) {
    let clock = ManualClock::new(Utc::now());
    let config = DedupConfig {
        ttl_days,
        ..DedupConfig::default()
    };
    let cache = DedupCache::new(
        Arc::new(MemoryDedupStore::new()),
        Arc::new(clock.clone()),
        &config,
    );
    (cache, clock)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// *For any* item key and price, once recorded the item is blocked by both policies
#[test]
fn property_recorded_item_is_known_to_both_policies() {
    proptest!(|(
        key in "[a-zA-Z0-9-]{1,24}",
        price in 0.01f64..100_000.0
    )| {
        runtime().block_on(async {
            let (cache, _) = cache(7);
            cache.record(&key, price, None, None).await.unwrap();

            prop_assert!(!cache.never_resend(&key).await.unwrap());
            prop_assert!(!cache.resend_on_price_change(&key, price).await.unwrap());
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    });
}

/// *For any* two prices further apart than the tolerance, the second one is
/// allowed through and becomes the stored price
#[test]
fn property_price_change_allows_resend_and_refreshes() {
    proptest!(|(
        key in "[a-z0-9]{1,16}",
        first in 1.0f64..10_000.0,
        delta in 0.02f64..1_000.0,
        cheaper in any::<bool>()
    )| {
        let second = if cheaper { first - delta } else { first + delta };

        runtime().block_on(async {
            let (cache, _) = cache(7);
            cache.record(&key, first, None, None).await.unwrap();

            prop_assert!(cache.resend_on_price_change(&key, second).await.unwrap());
            let record = cache.lookup(&key).await.unwrap().unwrap();
            prop_assert_eq!(record.price, second);

            // The strict policy ignores prices entirely
            prop_assert!(!cache.never_resend(&key).await.unwrap());
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    });
}

/// *For any* TTL, a record is known strictly before it elapses and gone once it has
#[test]
fn property_records_expire_after_ttl() {
    proptest!(|(
        ttl_days in 1i64..30,
        early_seconds in 1i64..86_400,
        late_seconds in 0i64..86_400
    )| {
        runtime().block_on(async {
            let (cache, clock) = cache(ttl_days);
            cache.record("item", 10.0, None, None).await.unwrap();

            clock.advance(Duration::days(ttl_days) - Duration::seconds(early_seconds));
            prop_assert!(!cache.never_resend("item").await.unwrap());

            clock.advance(Duration::seconds(early_seconds + late_seconds));
            prop_assert!(cache.never_resend("item").await.unwrap());
            prop_assert!(cache.resend_on_price_change("item", 10.0).await.unwrap());
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    });
}

/// The default ledger TTL is seven days
#[test]
fn property_default_ttl_is_seven_days() {
    runtime().block_on(async {
        let (cache, clock) = cache(DedupConfig::default().ttl_days);
        cache.record("item", 10.0, None, None).await.unwrap();

        clock.advance(Duration::days(7));
        assert!(cache.never_resend("item").await.unwrap());
    });
}

/// *For any* sequence of copy ids recorded for one item, the used set is their union
#[test]
fn property_used_copy_ids_accumulate() {
    proptest!(|(picks in prop::collection::vec(0usize..5, 1..20))| {
        let pool: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        runtime().block_on(async {
            let (cache, _) = cache(7);
            for pick in &picks {
                cache.record("item", 10.0, None, Some(pool[*pick])).await.unwrap();
            }

            let used = cache.used_copy_ids("item").await.unwrap();
            let expected: std::collections::BTreeSet<Uuid> =
                picks.iter().map(|p| pool[*p]).collect();
            prop_assert_eq!(used, expected);
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    });
}
