// Marketplace search adapters
//
// An adapter turns one keyword page request into scored candidates. Transport
// failures never escape an adapter: it falls back once to the alternate query
// and then answers with an empty page. Only configuration problems (refused
// signature, missing credentials) are returned as errors, since they are fatal
// for the run that hits them.

pub mod scoring;
pub mod shopee;
pub mod signing;
pub mod transport;

use crate::config::MarketplaceConfig;
use crate::errors::{ConfigurationError, ValidationError};
use crate::models::{Candidate, Integration, IntegrationCredentials, JobConfig, MarketplaceKind};
use async_trait::async_trait;
use std::sync::Arc;

pub use shopee::ShopeeAdapter;
pub use signing::RequestSigner;
pub use transport::{HttpMarketplaceTransport, MarketplaceTransport, QueryMode};

/// One page request for a keyword
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub keyword: String,
    pub cursor: Option<String>,
    /// Category declared by the caller; copied onto every candidate
    pub expected_category: Option<String>,
    pub expected_subcategory: Option<String>,
    pub min_commission: Option<f64>,
    pub min_score: Option<f64>,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    /// Query for a keyword using a job's category and thresholds
    pub fn for_job(keyword: impl Into<String>, config: &JobConfig) -> Self {
        Self {
            keyword: keyword.into(),
            cursor: None,
            expected_category: config.category.clone(),
            expected_subcategory: config.subcategory.clone(),
            min_commission: config.min_commission,
            min_score: config.min_score,
        }
    }

    /// Same query, positioned at another page
    pub fn at(&self, cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub candidates: Vec<Candidate>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl SearchPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Search capability of one marketplace
#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn kind(&self) -> MarketplaceKind;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ConfigurationError>;

    /// Append the affiliate identifier to a product link when one is configured
    fn affiliate_link(&self, raw_link: &str) -> String;
}

/// Builds the adapter for an integration
pub trait AdapterProvider: Send + Sync {
    fn adapter_for(
        &self,
        integration: &Integration,
    ) -> Result<Arc<dyn MarketplaceAdapter>, ConfigurationError>;
}

/// Provider backed by the HTTP transport.
///
/// Only Shopee is implemented; every other marketplace is reported as
/// `MarketplaceNotImplemented` instead of searching and finding nothing.
pub struct HttpAdapterProvider {
    config: MarketplaceConfig,
}

impl HttpAdapterProvider {
    pub fn new(config: MarketplaceConfig) -> Self {
        Self { config }
    }
}

impl AdapterProvider for HttpAdapterProvider {
    fn adapter_for(
        &self,
        integration: &Integration,
    ) -> Result<Arc<dyn MarketplaceAdapter>, ConfigurationError> {
        if !integration.is_active {
            return Err(ConfigurationError::IntegrationInactive(integration.id));
        }

        integration
            .credentials
            .validate()
            .map_err(|e| match e {
                ValidationError::MissingField(field) => {
                    ConfigurationError::MissingCredentials(field)
                }
                other => ConfigurationError::MissingCredentials(other.to_string()),
            })?;

        match &integration.credentials {
            IntegrationCredentials::Shopee {
                app_id,
                secret,
                affiliate_id,
            } => {
                let signer = RequestSigner::new(app_id.clone(), secret.clone())?;
                let transport = HttpMarketplaceTransport::new(
                    self.config.endpoint.clone(),
                    self.config.request_timeout_seconds,
                    signer,
                )?;
                Ok(Arc::new(ShopeeAdapter::new(
                    Arc::new(transport),
                    affiliate_id.clone(),
                    &self.config,
                )))
            }
            other => Err(ConfigurationError::MarketplaceNotImplemented(
                other.marketplace().to_string(),
            )),
        }
    }
}
