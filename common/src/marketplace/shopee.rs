// Shopee affiliate search adapter

use crate::config::{MarketplaceConfig, ScoreWeights};
use crate::errors::ConfigurationError;
use crate::marketplace::scoring::{infer_category, rank};
use crate::marketplace::transport::{
    is_signature_rejection, MarketplaceTransport, QueryMode, QueryRequest, RawPage,
};
use crate::marketplace::{MarketplaceAdapter, SearchPage, SearchQuery};
use crate::models::{Candidate, MarketplaceKind};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Query parameter carrying the affiliate identifier
pub const AFFILIATE_PARAM: &str = "affiliate_id";

pub struct ShopeeAdapter {
    transport: Arc<dyn MarketplaceTransport>,
    affiliate_id: Option<String>,
    page_size: u32,
    weights: ScoreWeights,
}

impl ShopeeAdapter {
    pub fn new(
        transport: Arc<dyn MarketplaceTransport>,
        affiliate_id: Option<String>,
        config: &MarketplaceConfig,
    ) -> Self {
        Self {
            transport,
            affiliate_id: affiliate_id.filter(|id| !id.trim().is_empty()),
            page_size: config.page_size,
            weights: config.weights.clone(),
        }
    }

    /// Primary query, then the alternate one; `None` when both failed
    async fn fetch(
        &self,
        request: &QueryRequest,
    ) -> Result<Option<RawPage>, ConfigurationError> {
        let primary_error = match self.transport.query(request, QueryMode::Primary).await {
            Ok(page) => return Ok(Some(page)),
            Err(e) if is_signature_rejection(&e) => {
                return Err(ConfigurationError::SignatureRejected(e.to_string()))
            }
            Err(e) => e,
        };

        warn!(error = %primary_error, "Primary marketplace query failed, trying alternate query");

        match self.transport.query(request, QueryMode::Alternate).await {
            Ok(page) => Ok(Some(page)),
            Err(e) if is_signature_rejection(&e) => {
                Err(ConfigurationError::SignatureRejected(e.to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Alternate marketplace query failed, returning empty page");
                Ok(None)
            }
        }
    }

    fn to_candidates(&self, raw: RawPage, query: &SearchQuery) -> Vec<Candidate> {
        rank(raw.items, &self.weights, query.min_commission, query.min_score)
            .into_iter()
            .map(|(item, score)| Candidate {
                inferred_category: infer_category(&item.name).map(str::to_string),
                link: self.affiliate_link(&item.link),
                item_id: item.id,
                name: item.name,
                price: item.price,
                original_price: item.original_price,
                rating: item.rating,
                image_url: item.image_url,
                category: query.expected_category.clone(),
                subcategory: query.expected_subcategory.clone(),
                commission: item.commission,
                score,
            })
            .collect()
    }
}

#[async_trait]
impl MarketplaceAdapter for ShopeeAdapter {
    fn kind(&self) -> MarketplaceKind {
        MarketplaceKind::Shopee
    }

    #[instrument(skip(self, query), fields(keyword = %query.keyword, cursor = ?query.cursor))]
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ConfigurationError> {
        let request = QueryRequest {
            keyword: query.keyword.clone(),
            cursor: query.cursor.clone(),
            page_size: self.page_size,
        };

        let Some(raw) = self.fetch(&request).await? else {
            return Ok(SearchPage::empty());
        };

        let has_more = raw.has_more && raw.cursor.is_some();
        let next_cursor = raw.cursor.clone();
        let candidates = self.to_candidates(raw, query);

        debug!(candidates = candidates.len(), has_more, "Marketplace page fetched");

        Ok(SearchPage {
            candidates,
            next_cursor,
            has_more,
        })
    }

    fn affiliate_link(&self, raw_link: &str) -> String {
        let Some(affiliate_id) = self.affiliate_id.as_deref() else {
            return raw_link.to_string();
        };

        match Url::parse(raw_link) {
            Ok(mut url) => {
                if url.query_pairs().any(|(key, _)| key == AFFILIATE_PARAM) {
                    return raw_link.to_string();
                }
                url.query_pairs_mut()
                    .append_pair(AFFILIATE_PARAM, affiliate_id);
                url.to_string()
            }
            Err(_) => {
                let separator = if raw_link.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", raw_link, separator, AFFILIATE_PARAM, affiliate_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::marketplace::transport::{MockMarketplaceTransport, RawItem};

    fn raw_item(id: &str, rating: f64) -> RawItem {
        RawItem {
            id: id.to_string(),
            name: format!("Fone {}", id),
            price: 50.0,
            rating: Some(rating),
            link: format!("https://shopee.com.br/item/{}", id),
            commission: 4.0,
            ..Default::default()
        }
    }

    fn page(items: Vec<RawItem>, has_more: bool) -> RawPage {
        RawPage {
            items,
            cursor: has_more.then(|| "2".to_string()),
            has_more,
        }
    }

    fn adapter(mock: MockMarketplaceTransport, affiliate_id: Option<&str>) -> ShopeeAdapter {
        ShopeeAdapter::new(
            Arc::new(mock),
            affiliate_id.map(str::to_string),
            &MarketplaceConfig::default(),
        )
    }

    fn query() -> SearchQuery {
        SearchQuery {
            expected_category: Some("eletronicos".to_string()),
            ..SearchQuery::new("fone bluetooth")
        }
    }

    #[tokio::test]
    async fn test_primary_results_are_scored_and_tagged() {
        let mut mock = MockMarketplaceTransport::new();
        mock.expect_query()
            .withf(|_, mode| *mode == QueryMode::Primary)
            .times(1)
            .returning(|_, _| Ok(page(vec![raw_item("a", 4.0), raw_item("b", 4.9)], true)));

        let result = adapter(mock, None).search(&query()).await.unwrap();

        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.candidates[0].item_id, "b");
        assert!(result.candidates[0].score > result.candidates[1].score);
        assert_eq!(result.candidates[0].category.as_deref(), Some("eletronicos"));
        assert_eq!(
            result.candidates[0].inferred_category.as_deref(),
            Some("eletronicos")
        );
        assert!(result.has_more);
        assert_eq!(result.next_cursor.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_to_alternate_once() {
        let mut mock = MockMarketplaceTransport::new();
        mock.expect_query()
            .withf(|_, mode| *mode == QueryMode::Primary)
            .times(1)
            .returning(|_, _| Err(TransportError::Timeout(15)));
        mock.expect_query()
            .withf(|_, mode| *mode == QueryMode::Alternate)
            .times(1)
            .returning(|_, _| Ok(page(vec![raw_item("a", 4.8)], false)));

        let result = adapter(mock, None).search(&query()).await.unwrap();

        assert_eq!(result.candidates.len(), 1);
        assert!(!result.has_more);
    }

    #[tokio::test]
    async fn test_both_queries_failing_yields_empty_page() {
        let mut mock = MockMarketplaceTransport::new();
        mock.expect_query().times(2).returning(|_, _| {
            Err(TransportError::UnexpectedStatus {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let result = adapter(mock, None).search(&query()).await.unwrap();

        assert!(result.candidates.is_empty());
        assert!(!result.has_more);
        assert!(result.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_signature_rejection_is_fatal() {
        let mut mock = MockMarketplaceTransport::new();
        mock.expect_query()
            .withf(|_, mode| *mode == QueryMode::Primary)
            .times(1)
            .returning(|_, _| {
                Err(TransportError::Api {
                    code: 10020,
                    message: "Invalid Signature".to_string(),
                })
            });

        let err = adapter(mock, None).search(&query()).await.unwrap_err();

        assert!(matches!(err, ConfigurationError::SignatureRejected(_)));
    }

    #[tokio::test]
    async fn test_min_commission_drops_candidates() {
        let mut mock = MockMarketplaceTransport::new();
        mock.expect_query().returning(|_, _| {
            let mut cheap = raw_item("cheap", 5.0);
            cheap.commission = 0.2;
            Ok(page(vec![cheap, raw_item("ok", 4.5)], false))
        });

        let q = SearchQuery {
            min_commission: Some(1.0),
            ..query()
        };
        let result = adapter(mock, None).search(&q).await.unwrap();

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].item_id, "ok");
    }

    #[test]
    fn test_affiliate_link_appends_param() {
        let adapter = adapter(MockMarketplaceTransport::new(), Some("an_42"));

        assert_eq!(
            adapter.affiliate_link("https://shopee.com.br/item/1"),
            "https://shopee.com.br/item/1?affiliate_id=an_42"
        );
        assert_eq!(
            adapter.affiliate_link("https://shopee.com.br/item/1?sp=1"),
            "https://shopee.com.br/item/1?sp=1&affiliate_id=an_42"
        );
    }

    #[test]
    fn test_affiliate_link_unchanged_without_id() {
        let adapter = adapter(MockMarketplaceTransport::new(), None);
        assert_eq!(
            adapter.affiliate_link("https://shopee.com.br/item/1"),
            "https://shopee.com.br/item/1"
        );
    }

    #[test]
    fn test_affiliate_link_not_duplicated() {
        let adapter = adapter(MockMarketplaceTransport::new(), Some("an_42"));
        let link = "https://shopee.com.br/item/1?affiliate_id=an_42";
        assert_eq!(adapter.affiliate_link(link), link);
    }
}
