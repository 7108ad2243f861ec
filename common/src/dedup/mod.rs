// Dedup ledger of already-promoted marketplace items
//
// Two policies share one ledger and are deliberately kept as separate operations:
// `never_resend` blocks any known item, `resend_on_price_change` lets a known item
// through again once its price moved by more than the configured tolerance.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;

use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::errors::CacheStoreError;
use crate::models::CacheRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Fields written by a `record` call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub price: f64,
    pub original_price: Option<f64>,
    pub copy_id: Option<Uuid>,
}

/// Result of comparing a price against the ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCheck {
    /// No unexpired record for the key
    Absent,
    /// Known item, price within tolerance
    Unchanged,
    /// Known item whose price moved; the record now holds the new price
    Refreshed { previous: f64 },
}

/// Backing store for the ledger. Every method is atomic for its key.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Fetch the record, treating anything expired at `now` as absent
    async fn get(&self, key: &str, now: DateTime<Utc>)
        -> Result<Option<CacheRecord>, CacheStoreError>;

    /// Create or update the record, merging `used_copy_ids` and resetting its TTL
    async fn upsert(
        &self,
        key: &str,
        update: &RecordUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<CacheRecord, CacheStoreError>;

    /// Compare `price` to the stored one and store it when it moved beyond `tolerance`
    async fn refresh_if_price_changed(
        &self,
        key: &str,
        price: f64,
        tolerance: f64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<PriceCheck, CacheStoreError>;

    /// Delete every key matching a glob pattern, returning how many were removed
    async fn clear(&self, pattern: &str) -> Result<u64, CacheStoreError>;
}

/// Normalize a marketplace item identifier into a ledger key suffix
pub fn normalize_item_key(item_id: &str) -> String {
    item_id.trim().to_lowercase()
}

/// Policy layer over a `DedupStore`
#[derive(Clone)]
pub struct DedupCache {
    store: Arc<dyn DedupStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    ttl: Duration,
    price_tolerance: f64,
}

impl DedupCache {
    pub fn new(store: Arc<dyn DedupStore>, clock: Arc<dyn Clock>, config: &DedupConfig) -> Self {
        Self {
            store,
            clock,
            key_prefix: config.key_prefix.clone(),
            ttl: Duration::days(config.ttl_days),
            price_tolerance: config.price_tolerance,
        }
    }

    fn key(&self, item_id: &str) -> String {
        format!("{}:{}", self.key_prefix, normalize_item_key(item_id))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True only when the item has never been recorded (or its record expired)
    #[instrument(skip(self))]
    pub async fn never_resend(&self, item_id: &str) -> Result<bool, CacheStoreError> {
        let record = self.store.get(&self.key(item_id), self.clock.now()).await?;
        Ok(record.is_none())
    }

    /// True when the item is unknown or its price moved by more than the tolerance.
    ///
    /// A price move refreshes the stored price immediately.
    #[instrument(skip(self))]
    pub async fn resend_on_price_change(
        &self,
        item_id: &str,
        current_price: f64,
    ) -> Result<bool, CacheStoreError> {
        let check = self
            .store
            .refresh_if_price_changed(
                &self.key(item_id),
                current_price,
                self.price_tolerance,
                self.clock.now(),
                self.ttl,
            )
            .await?;

        match check {
            PriceCheck::Absent => Ok(true),
            PriceCheck::Unchanged => {
                debug!(item_id, "Known item at unchanged price");
                Ok(false)
            }
            PriceCheck::Refreshed { previous } => {
                info!(
                    item_id,
                    previous_price = previous,
                    current_price,
                    "Known item changed price, allowing resend"
                );
                Ok(true)
            }
        }
    }

    /// Record a send; merges `copy_id` into the used set and resets the TTL
    #[instrument(skip(self))]
    pub async fn record(
        &self,
        item_id: &str,
        price: f64,
        original_price: Option<f64>,
        copy_id: Option<Uuid>,
    ) -> Result<CacheRecord, CacheStoreError> {
        let update = RecordUpdate {
            price,
            original_price,
            copy_id,
        };
        self.store
            .upsert(&self.key(item_id), &update, self.clock.now(), self.ttl)
            .await
    }

    pub async fn lookup(&self, item_id: &str) -> Result<Option<CacheRecord>, CacheStoreError> {
        self.store.get(&self.key(item_id), self.clock.now()).await
    }

    pub async fn used_copy_ids(&self, item_id: &str) -> Result<BTreeSet<Uuid>, CacheStoreError> {
        Ok(self
            .lookup(item_id)
            .await?
            .map(|record| record.used_copy_ids)
            .unwrap_or_default())
    }

    /// Evict every record whose item key matches `scope` (glob, `*` for everything)
    #[instrument(skip(self))]
    pub async fn clear_all(&self, scope: &str) -> Result<u64, CacheStoreError> {
        let scope = scope.trim();
        if scope.chars().any(char::is_whitespace) {
            return Err(CacheStoreError::InvalidScope(scope.to_string()));
        }
        let scope = if scope.is_empty() { "*" } else { scope };
        let pattern = format!("{}:{}", self.key_prefix, scope);
        let removed = self.store.clear(&pattern).await?;
        info!(pattern = %pattern, removed, "Dedup cache cleared");
        Ok(removed)
    }
}
