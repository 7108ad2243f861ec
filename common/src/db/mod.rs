// Database layer module
// Postgres pool, Redis connection manager and the sqlx-backed repositories

pub mod pool;
pub mod redis;
pub mod repositories;

pub use pool::DbPool;
pub use redis::RedisPool;
