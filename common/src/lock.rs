// Per-job run locks
//
// `RedLock` (Redis SET NX EX + checked delete) guards runs across scheduler
// instances; `LocalLock` is the in-process equivalent for single-node setups
// and tests.

use crate::db::RedisPool;
use crate::errors::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const LOCK_KEY_PREFIX: &str = "promo:lock";

/// Lock over a named resource with a TTL
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// `Ok(None)` when another holder owns the resource
    async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StorageError>;
}

trait Release: Send + Sync {
    fn release(&self, resource: String, token: String);
}

/// Releases its lock when dropped
pub struct LockGuard {
    resource: String,
    token: String,
    acquired_at: Instant,
    releaser: Arc<dyn Release>,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.releaser
            .release(self.resource.clone(), self.token.clone());
    }
}

/// Redis-backed lock shared by every scheduler instance
pub struct RedLock {
    pool: RedisPool,
    retry_count: u32,
    retry_delay: Duration,
}

impl RedLock {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            retry_count: 1,
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn with_retry(pool: RedisPool, retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            pool,
            retry_count: retry_count.max(1),
            retry_delay,
        }
    }

    async fn try_acquire_once(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StorageError> {
        let mut conn = self.pool.get_connection();
        let key = format!("{}:{}", LOCK_KEY_PREFIX, resource);
        let token = Uuid::new_v4().to_string();

        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to acquire lock: {}", e)))?;

        if result.is_none() {
            return Ok(None);
        }

        debug!(resource = %resource, ttl_seconds = ttl.as_secs(), "Lock acquired");
        Ok(Some(LockGuard {
            resource: resource.to_string(),
            token,
            acquired_at: Instant::now(),
            releaser: Arc::new(RedisRelease {
                pool: self.pool.clone(),
            }),
        }))
    }
}

#[async_trait]
impl DistributedLock for RedLock {
    #[instrument(skip(self), fields(ttl_seconds = ttl.as_secs()))]
    async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StorageError> {
        for attempt in 1..=self.retry_count {
            if let Some(guard) = self.try_acquire_once(resource, ttl).await? {
                return Ok(Some(guard));
            }
            if attempt < self.retry_count {
                debug!(attempt, "Lock held elsewhere, retrying");
                sleep(self.retry_delay).await;
            }
        }
        Ok(None)
    }
}

struct RedisRelease {
    pool: RedisPool,
}

impl Release for RedisRelease {
    fn release(&self, resource: String, token: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = release_redis_lock(&pool, &resource, &token).await {
                warn!(resource = %resource, error = %e, "Failed to release lock on drop");
            }
        });
    }
}

/// Delete the lock key only if it still holds our token
async fn release_redis_lock(
    pool: &RedisPool,
    resource: &str,
    token: &str,
) -> Result<(), StorageError> {
    let mut conn = pool.get_connection();
    let key = format!("{}:{}", LOCK_KEY_PREFIX, resource);

    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let released: i32 = redis::Script::new(script)
        .key(&key)
        .arg(token)
        .invoke_async(&mut conn)
        .await
        .map_err(|e| StorageError::RedisError(format!("Failed to release lock: {}", e)))?;

    if released == 1 {
        debug!(resource = %resource, "Lock released");
    } else {
        warn!(resource = %resource, "Lock was not owned or already expired");
    }
    Ok(())
}

/// In-process lock with the same semantics as `RedLock`
#[derive(Clone, Default)]
pub struct LocalLock {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Release for LocalLock {
    fn release(&self, resource: String, token: String) {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if held.get(&resource).map(|(t, _)| t == &token).unwrap_or(false) {
            held.remove(&resource);
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StorageError> {
        let now = Instant::now();
        let token = Uuid::new_v4().to_string();
        {
            let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
            if let Some((_, expires_at)) = held.get(resource) {
                if *expires_at > now {
                    return Ok(None);
                }
            }
            held.insert(resource.to_string(), (token.clone(), now + ttl));
        }

        Ok(Some(LockGuard {
            resource: resource.to_string(),
            token,
            acquired_at: now,
            releaser: Arc::new(self.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[tokio::test]
    async fn test_local_lock_is_exclusive_until_dropped() {
        let lock = LocalLock::new();

        let guard = lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(guard.resource(), "job:1");
        assert!(lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
        assert!(lock
            .try_acquire("job:2", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());

        drop(guard);
        assert!(lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_local_lock_expires() {
        let lock = LocalLock::new();
        let _stale = lock
            .try_acquire("job:1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_release_new_holder() {
        let lock = LocalLock::new();
        let stale = lock
            .try_acquire("job:1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _current = lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        drop(stale);

        assert!(lock
            .try_acquire("job:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redlock_exclusivity() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        };
        let pool = RedisPool::new(&config).await.unwrap();
        let lock1 = RedLock::new(pool.clone());
        let lock2 = RedLock::with_retry(pool, 1, Duration::from_millis(10));

        let _guard = lock1
            .try_acquire("exclusive_resource", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        assert!(lock2
            .try_acquire("exclusive_resource", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redlock_released_on_drop() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        };
        let pool = RedisPool::new(&config).await.unwrap();
        let lock = RedLock::new(pool);

        {
            let _guard = lock
                .try_acquire("auto_release_resource", Duration::from_secs(10))
                .await
                .unwrap()
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(lock
            .try_acquire("auto_release_resource", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }
}
