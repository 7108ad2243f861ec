// Redis-backed dedup store
//
// Records are hashes; read-modify-write operations run as Lua scripts so that
// concurrent writers never lose accumulated copy ids.

use super::{DedupStore, PriceCheck, RecordUpdate};
use crate::db::RedisPool;
use crate::errors::CacheStoreError;
use crate::models::CacheRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use redis::AsyncCommands;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};
use uuid::Uuid;

const UPSERT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[4])
local used = ''
local expires = tonumber(redis.call('HGET', key, 'expires_at_ms') or '0')
if expires > now then
    used = redis.call('HGET', key, 'used_copy_ids') or ''
end
local copy = ARGV[3]
if copy ~= '' and not string.find(',' .. used .. ',', ',' .. copy .. ',', 1, true) then
    if used == '' then
        used = copy
    else
        used = used .. ',' .. copy
    end
end
redis.call('DEL', key)
redis.call('HSET', key,
    'price', ARGV[1],
    'original_price', ARGV[2],
    'sent_at_ms', ARGV[4],
    'expires_at_ms', ARGV[5],
    'used_copy_ids', used)
redis.call('EXPIRE', key, ARGV[6])
return used
"#;

const PRICE_CHECK_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[2])
local expires = tonumber(redis.call('HGET', key, 'expires_at_ms') or '0')
if expires <= now then
    return {0, ''}
end
local previous = redis.call('HGET', key, 'price') or ''
local prev = tonumber(previous)
if prev ~= nil and math.abs(prev - tonumber(ARGV[1])) <= tonumber(ARGV[3]) then
    return {1, previous}
end
redis.call('HSET', key, 'price', ARGV[1], 'sent_at_ms', ARGV[2], 'expires_at_ms', ARGV[4])
redis.call('EXPIRE', key, ARGV[5])
return {2, previous}
"#;

/// Dedup store over a shared Redis connection manager
#[derive(Clone)]
pub struct RedisDedupStore {
    pool: RedisPool,
    scan_batch: usize,
}

impl RedisDedupStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            scan_batch: 500,
        }
    }
}

fn millis_to_datetime(key: &str, millis: i64) -> Result<DateTime<Utc>, CacheStoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CacheStoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("invalid timestamp {}", millis),
        })
}

fn parse_field<T: std::str::FromStr>(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<T, CacheStoreError> {
    fields
        .get(name)
        .and_then(|raw| raw.parse::<T>().ok())
        .ok_or_else(|| CacheStoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("missing or invalid field '{}'", name),
        })
}

pub(crate) fn parse_copy_ids(key: &str, raw: &str) -> Result<BTreeSet<Uuid>, CacheStoreError> {
    raw.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            Uuid::parse_str(part).map_err(|e| CacheStoreError::CorruptRecord {
                key: key.to_string(),
                reason: format!("invalid copy id '{}': {}", part, e),
            })
        })
        .collect()
}

/// Decode a record hash; an empty hash means no record
fn decode_record(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<CacheRecord>, CacheStoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let original_price = match fields.get("original_price").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<f64>().map_err(|e| CacheStoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("invalid original_price: {}", e),
        })?),
    };

    Ok(Some(CacheRecord {
        price: parse_field(key, fields, "price")?,
        original_price,
        sent_at: millis_to_datetime(key, parse_field(key, fields, "sent_at_ms")?)?,
        expires_at: millis_to_datetime(key, parse_field(key, fields, "expires_at_ms")?)?,
        used_copy_ids: parse_copy_ids(
            key,
            fields.get("used_copy_ids").map(String::as_str).unwrap_or(""),
        )?,
    }))
}

fn ttl_seconds(ttl: Duration) -> i64 {
    ttl.num_seconds().max(1)
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    #[instrument(skip(self))]
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>, CacheStoreError> {
        let mut conn = self.pool.get_connection();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(decode_record(key, &fields)?.filter(|record| !record.is_expired(now)))
    }

    #[instrument(skip(self, update))]
    async fn upsert(
        &self,
        key: &str,
        update: &RecordUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<CacheRecord, CacheStoreError> {
        let mut conn = self.pool.get_connection();
        let expires_at = now + ttl;

        let used: String = redis::Script::new(UPSERT_SCRIPT)
            .key(key)
            .arg(update.price.to_string())
            .arg(
                update
                    .original_price
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
            )
            .arg(update.copy_id.map(|id| id.to_string()).unwrap_or_default())
            .arg(now.timestamp_millis())
            .arg(expires_at.timestamp_millis())
            .arg(ttl_seconds(ttl))
            .invoke_async(&mut conn)
            .await?;

        debug!(key, used_copy_ids = %used, "Dedup record written");

        Ok(CacheRecord {
            price: update.price,
            original_price: update.original_price,
            sent_at: now,
            expires_at,
            used_copy_ids: parse_copy_ids(key, &used)?,
        })
    }

    #[instrument(skip(self))]
    async fn refresh_if_price_changed(
        &self,
        key: &str,
        price: f64,
        tolerance: f64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<PriceCheck, CacheStoreError> {
        let mut conn = self.pool.get_connection();

        let (outcome, previous): (i64, String) = redis::Script::new(PRICE_CHECK_SCRIPT)
            .key(key)
            .arg(price.to_string())
            .arg(now.timestamp_millis())
            .arg(tolerance.to_string())
            .arg((now + ttl).timestamp_millis())
            .arg(ttl_seconds(ttl))
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            0 => Ok(PriceCheck::Absent),
            1 => Ok(PriceCheck::Unchanged),
            _ => Ok(PriceCheck::Refreshed {
                previous: previous.parse().unwrap_or(f64::NAN),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn clear(&self, pattern: &str) -> Result<u64, CacheStoreError> {
        let mut conn = self.pool.get_connection();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}
