// In-process dedup store for tests and single-node runs without Redis

use super::{DedupStore, PriceCheck, RecordUpdate};
use crate::errors::CacheStoreError;
use crate::models::CacheRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Ledger kept in a map behind a single mutex, so every operation is atomic
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

/// Translate a Redis-style glob (`*`, `?`) into an anchored regex
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, CacheStoreError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| CacheStoreError::InvalidScope(e.to_string()))
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>, CacheStoreError> {
        let records = self.records.lock().await;
        Ok(records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn upsert(
        &self,
        key: &str,
        update: &RecordUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<CacheRecord, CacheStoreError> {
        let mut records = self.records.lock().await;
        // Writes sweep expired entries, standing in for Redis key expiry
        records.retain(|_, record| !record.is_expired(now));

        let mut used_copy_ids = records
            .get(key)
            .map(|record| record.used_copy_ids.clone())
            .unwrap_or_default();
        if let Some(copy_id) = update.copy_id {
            used_copy_ids.insert(copy_id);
        }

        let record = CacheRecord {
            price: update.price,
            original_price: update.original_price,
            sent_at: now,
            expires_at: now + ttl,
            used_copy_ids,
        };
        records.insert(key.to_string(), record.clone());
        Ok(record)
    }

    async fn refresh_if_price_changed(
        &self,
        key: &str,
        price: f64,
        tolerance: f64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<PriceCheck, CacheStoreError> {
        let mut records = self.records.lock().await;

        let record = match records.get_mut(key) {
            Some(record) if !record.is_expired(now) => record,
            _ => return Ok(PriceCheck::Absent),
        };

        if (record.price - price).abs() <= tolerance {
            return Ok(PriceCheck::Unchanged);
        }

        let previous = record.price;
        record.price = price;
        record.sent_at = now;
        record.expires_at = now + ttl;
        Ok(PriceCheck::Refreshed { previous })
    }

    async fn clear(&self, pattern: &str) -> Result<u64, CacheStoreError> {
        let matcher = glob_to_regex(pattern)?;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|key, _| !matcher.is_match(key));
        Ok((before - records.len()) as u64)
    }
}
