// Redis connection shared by the dedup ledger and the run lock

use crate::config::RedisConfig;
use crate::errors::StorageError;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Cloneable handle over one auto-reconnecting Redis connection.
///
/// `new` fails unless the server answers a PING.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            StorageError::ConnectionFailed(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
        })?;

        let pool = Self { manager };
        let latency = pool.ping().await?;
        info!(latency_ms = latency.as_millis() as u64, "Redis connection ready");

        Ok(pool)
    }

    pub fn get_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Round trip of a PING
    pub async fn ping(&self) -> Result<Duration, StorageError> {
        let mut conn = self.get_connection();
        let started = Instant::now();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("PING failed: {}", e)))?;
        if response != "PONG" {
            return Err(StorageError::RedisError(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        let elapsed = started.elapsed();
        debug!(latency_ms = elapsed.as_millis() as u64, "Redis PING");
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_connect_and_ping() {
        let pool = RedisPool::new(&RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        })
        .await
        .unwrap();

        assert!(pool.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_url_is_rejected() {
        let result = RedisPool::new(&RedisConfig {
            url: "not-a-redis-url".to_string(),
            pool_size: 10,
        })
        .await;

        assert!(matches!(result, Err(StorageError::ConnectionFailed(_))));
    }
}
