// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub scheduler: SchedulerSettings,
    pub dedup: DedupConfig,
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub poll_interval_seconds: u64,
    pub run_lock_ttl_seconds: u64,
    pub max_jobs_per_poll: usize,
    #[serde(default)]
    pub distributed_lock: bool,
    pub publish_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub backend: DedupBackend,
    pub key_prefix: String,
    pub ttl_days: i64,
    pub price_tolerance: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            backend: DedupBackend::Redis,
            key_prefix: "promo:sent".to_string(),
            ttl_days: 7,
            price_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub commission: f64,
    pub rating: f64,
    pub sales: f64,
    pub discount: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            commission: 0.3,
            rating: 0.4,
            sales: 0.2,
            discount: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    pub endpoint: String,
    pub request_timeout_seconds: u64,
    pub max_page_attempts: u32,
    pub page_size: u32,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://open-api.affiliate.shopee.com.br/graphql".to_string(),
            request_timeout_seconds: 15,
            max_page_attempts: 50,
            page_size: 20,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub default_min_rating: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default_min_rating: crate::models::DEFAULT_MIN_RATING,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub currency_symbol: String,
    pub call_to_action: String,
    pub from_label: String,
    pub now_label: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            currency_symbol: "R$".to_string(),
            call_to_action: "🛒 Compre aqui:".to_string(),
            from_label: "De".to_string(),
            now_label: "por".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.dedup.backend == DedupBackend::Redis && self.redis.url.is_empty() {
            return Err("Redis URL cannot be empty when the dedup backend is redis".to_string());
        }

        if self.scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.run_lock_ttl_seconds == 0 {
            return Err("Scheduler run_lock_ttl_seconds must be greater than 0".to_string());
        }
        if self.scheduler.publish_timeout_seconds == 0 {
            return Err("Scheduler publish_timeout_seconds must be greater than 0".to_string());
        }

        if self.dedup.ttl_days <= 0 {
            return Err("Dedup ttl_days must be greater than 0".to_string());
        }
        if self.dedup.price_tolerance <= 0.0 {
            return Err("Dedup price_tolerance must be greater than 0".to_string());
        }
        if self.dedup.key_prefix.is_empty() {
            return Err("Dedup key_prefix cannot be empty".to_string());
        }

        if self.marketplace.endpoint.is_empty() {
            return Err("Marketplace endpoint cannot be empty".to_string());
        }
        if self.marketplace.max_page_attempts == 0 {
            return Err("Marketplace max_page_attempts must be greater than 0".to_string());
        }
        if self.marketplace.request_timeout_seconds == 0 {
            return Err("Marketplace request_timeout_seconds must be greater than 0".to_string());
        }

        if !(0.0..=5.0).contains(&self.filters.default_min_rating) {
            return Err("Filter default_min_rating must be between 0 and 5".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/promo_pipeline".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                pool_size: 10,
            },
            scheduler: SchedulerSettings {
                poll_interval_seconds: 5,
                run_lock_ttl_seconds: 900,
                max_jobs_per_poll: 100,
                distributed_lock: false,
                publish_timeout_seconds: 20,
            },
            dedup: DedupConfig::default(),
            marketplace: MarketplaceConfig::default(),
            filters: FilterConfig::default(),
            message: MessageConfig::default(),
            telegram: TelegramConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_poll_interval() {
        let mut settings = Settings::default();
        settings.scheduler.poll_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_non_positive_tolerance() {
        let mut settings = Settings::default();
        settings.dedup.price_tolerance = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_rating_out_of_range() {
        let mut settings = Settings::default();
        settings.filters.default_min_rating = 5.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_memory_backend_does_not_need_redis() {
        let mut settings = Settings::default();
        settings.dedup.backend = DedupBackend::Memory;
        settings.redis.url = String::new();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[database]
url = "postgresql://localhost/promo_test"
max_connections = 5
min_connections = 1
connect_timeout_seconds = 10

[redis]
url = "redis://localhost:6379"
pool_size = 4

[scheduler]
poll_interval_seconds = 3
run_lock_ttl_seconds = 600
max_jobs_per_poll = 20
publish_timeout_seconds = 10

[dedup]
backend = "memory"
key_prefix = "test:sent"
ttl_days = 7
price_tolerance = 0.01

[marketplace]
endpoint = "http://localhost:9999/graphql"
request_timeout_seconds = 5
max_page_attempts = 50
page_size = 10

[observability]
log_level = "debug"
metrics_port = 9100
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.scheduler.poll_interval_seconds, 3);
        assert_eq!(settings.dedup.backend, DedupBackend::Memory);
        assert_eq!(settings.filters.default_min_rating, 4.5);
        assert_eq!(settings.marketplace.weights.rating, 0.4);
        assert!(settings.validate().is_ok());
    }
}
