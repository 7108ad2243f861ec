// Error handling framework shared by the pipeline, the repositories and the scheduler binary

use thiserror::Error;
use uuid::Uuid;

/// Configuration problems that make a single job run impossible.
///
/// These are fatal for the run that hits them: the job is skipped and still rescheduled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Integration not found: {0}")]
    IntegrationNotFound(Uuid),

    #[error("Integration {0} is inactive")]
    IntegrationInactive(Uuid),

    #[error("Missing marketplace credentials: {0}")]
    MissingCredentials(String),

    #[error("Marketplace '{0}' is not implemented")]
    MarketplaceNotImplemented(String),

    #[error("Marketplace rejected the request signature: {0}")]
    SignatureRejected(String),

    #[error("Marketplace client could not be built: {0}")]
    ClientSetup(String),

    #[error("Job {0} has no active channels")]
    NoActiveChannels(Uuid),

    #[error("Job {0} has no resolvable catalog entries or keywords")]
    NoCatalogEntries(Uuid),
}

/// Failures talking to the marketplace or to a channel API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(0)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::RequestFailed(err.to_string())
        }
    }
}

/// Validation errors raised when a job or integration is written
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Dedup ledger backing-store failures.
///
/// Never mapped to a send/no-send default; callers decide what to do per context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheStoreError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Corrupt cache record for {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Invalid cache scope pattern: {0}")]
    InvalidScope(String),
}

impl From<redis::RedisError> for CacheStoreError {
    fn from(err: redis::RedisError) -> Self {
        CacheStoreError::Redis(err.to_string())
    }
}

/// Channel publishing failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Channel type '{0}' is not supported")]
    Unsupported(String),

    #[error("Channel {0} is missing required configuration: {1}")]
    MisconfiguredChannel(Uuid, String),

    #[error("Publish timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Storage errors surfaced by the store traits
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors surfaced by the scheduler engine to its callers
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => StorageError::NotFound(what),
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}
