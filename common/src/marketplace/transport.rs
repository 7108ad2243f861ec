// Marketplace wire transport: signed GraphQL queries over HTTP

use crate::errors::{ConfigurationError, TransportError};
use crate::marketplace::signing::RequestSigner;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// Open API error codes meaning the request signature was refused
pub const SIGNATURE_ERROR_CODES: &[i64] = &[10020];

/// Which query mechanism to use for a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Full offer query with ranking fields
    Primary,
    /// Reduced keyword query, tried once when the primary query fails
    Alternate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub keyword: String,
    pub cursor: Option<String>,
    pub page_size: u32,
}

/// One item as reported by the marketplace, before scoring
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub rating: Option<f64>,
    pub link: String,
    pub image_url: Option<String>,
    /// Commission amount in currency units
    pub commission: f64,
    pub sales_count: Option<u64>,
    /// Fraction in [0, 1]
    pub discount_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPage {
    pub items: Vec<RawItem>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplaceTransport: Send + Sync {
    async fn query(&self, request: &QueryRequest, mode: QueryMode)
        -> Result<RawPage, TransportError>;
}

/// True when the marketplace refused the request signature
pub fn is_signature_rejection(err: &TransportError) -> bool {
    match err {
        TransportError::Api { code, message } => {
            SIGNATURE_ERROR_CODES.contains(code) || message.to_lowercase().contains("signature")
        }
        _ => false,
    }
}

/// HTTP transport for the Shopee affiliate GraphQL endpoint
pub struct HttpMarketplaceTransport {
    client: Client,
    endpoint: String,
    signer: RequestSigner,
    timeout_seconds: u64,
}

impl HttpMarketplaceTransport {
    pub fn new(
        endpoint: impl Into<String>,
        timeout_seconds: u64,
        signer: RequestSigner,
    ) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| {
                ConfigurationError::ClientSetup(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            signer,
            timeout_seconds,
        })
    }

    fn build_query(request: &QueryRequest, mode: QueryMode) -> String {
        let page = current_page(request.cursor.as_deref());
        // serde_json string encoding is a valid GraphQL string literal
        let keyword = Value::String(request.keyword.clone()).to_string();

        match mode {
            QueryMode::Primary => format!(
                "{{productOfferV2(keyword: {}, sortType: 2, page: {}, limit: {}) {{ \
                 nodes {{ itemId productName priceMin priceDiscountRate commission commissionRate \
                 sales ratingStar imageUrl offerLink productLink }} \
                 pageInfo {{ page limit hasNextPage }} }} }}",
                keyword, page, request.page_size
            ),
            QueryMode::Alternate => format!(
                "{{productOfferV2(keyword: {}, page: {}, limit: {}) {{ \
                 nodes {{ itemId productName priceMin commissionRate imageUrl offerLink }} \
                 pageInfo {{ hasNextPage }} }} }}",
                keyword, page, request.page_size
            ),
        }
    }
}

#[async_trait]
impl MarketplaceTransport for HttpMarketplaceTransport {
    #[instrument(skip(self, request), fields(keyword = %request.keyword, cursor = ?request.cursor))]
    async fn query(
        &self,
        request: &QueryRequest,
        mode: QueryMode,
    ) -> Result<RawPage, TransportError> {
        let payload = json!({ "query": Self::build_query(request, mode) }).to_string();
        let timestamp = Utc::now().timestamp();
        let authorization = self
            .signer
            .authorization(timestamp, &payload)
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        debug!(?mode, app_id = self.signer.app_id(), "Querying marketplace");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout_seconds)
                } else {
                    TransportError::from(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        parse_page(&body, current_page(request.cursor.as_deref()))
    }
}

fn current_page(cursor: Option<&str>) -> u64 {
    cursor
        .and_then(|c| c.parse::<u64>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1)
}

/// Decode a GraphQL response body; page cursors are page numbers
pub(crate) fn parse_page(body: &str, page: u64) -> Result<RawPage, TransportError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;

    if let Some(error) = value
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        let code = error
            .pointer("/extensions/code")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let message = error
            .pointer("/extensions/message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Api { code, message });
    }

    let offers = value
        .pointer("/data/productOfferV2")
        .ok_or_else(|| TransportError::Decode("missing data.productOfferV2".to_string()))?;

    let items: Vec<RawItem> = offers
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().filter_map(parse_item).collect())
        .unwrap_or_default();

    let has_more = offers
        .pointer("/pageInfo/hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(RawPage {
        items,
        cursor: has_more.then(|| (page + 1).to_string()),
        has_more,
    })
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_item(node: &Value) -> Option<RawItem> {
    let id = text(node.get("itemId"))?;
    let name = text(node.get("productName"))?;
    let price = number(node.get("priceMin"))?;
    let link = text(node.get("offerLink")).or_else(|| text(node.get("productLink")))?;

    // Rates come as percent integers
    let discount_rate = number(node.get("priceDiscountRate"))
        .map(|rate| if rate > 1.0 { rate / 100.0 } else { rate })
        .filter(|rate| *rate > 0.0 && *rate < 1.0);
    let original_price =
        discount_rate.map(|rate| ((price / (1.0 - rate)) * 100.0).round() / 100.0);

    let commission = number(node.get("commission"))
        .or_else(|| number(node.get("commissionRate")).map(|rate| rate * price))
        .unwrap_or(0.0);

    Some(RawItem {
        id,
        name,
        price,
        original_price,
        rating: number(node.get("ratingStar")).filter(|r| *r > 0.0),
        link,
        image_url: text(node.get("imageUrl")),
        commission,
        sales_count: node.get("sales").and_then(Value::as_u64),
        discount_rate,
    })
}
