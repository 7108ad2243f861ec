// Paginated search for items that were never promoted before

use crate::dedup::{normalize_item_key, DedupCache};
use crate::errors::ConfigurationError;
use crate::marketplace::{MarketplaceAdapter, SearchQuery};
use crate::models::Candidate;
use crate::telemetry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_PAGE_ATTEMPTS: u32 = 50;

/// Pages through an adapter until enough unseen items are collected.
///
/// Page-level novelty uses the strict `never_resend` policy: an item that
/// was ever sent is not reconsidered here, whatever its price.
pub struct NewItemFinder {
    adapter: Arc<dyn MarketplaceAdapter>,
    cache: DedupCache,
    max_page_attempts: u32,
}

impl NewItemFinder {
    pub fn new(adapter: Arc<dyn MarketplaceAdapter>, cache: DedupCache, max_page_attempts: u32) -> Self {
        Self {
            adapter,
            cache,
            max_page_attempts: max_page_attempts.max(1),
        }
    }

    pub async fn find_new(
        &self,
        query: &SearchQuery,
        target: usize,
    ) -> Result<Vec<Candidate>, ConfigurationError> {
        self.find_new_matching(query, target, |_| true).await
    }

    /// Like `find_new`, but only candidates accepted by `accept` count toward `target`.
    ///
    /// Stops when `target` items are collected, the adapter reports no further
    /// page, or the page budget runs out. Pages without any new item still
    /// advance the cursor. No two returned items share a link or an item id.
    #[instrument(skip(self, query, accept), fields(keyword = %query.keyword))]
    pub async fn find_new_matching<F>(
        &self,
        query: &SearchQuery,
        target: usize,
        accept: F,
    ) -> Result<Vec<Candidate>, ConfigurationError>
    where
        F: Fn(&Candidate) -> bool + Send + Sync,
    {
        let mut found: Vec<Candidate> = Vec::new();
        if target == 0 {
            return Ok(found);
        }

        let mut seen_links: HashSet<String> = HashSet::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut cursor = query.cursor.clone();
        let mut pages = 0;

        while pages < self.max_page_attempts {
            pages += 1;
            let page = self.adapter.search(&query.at(cursor.clone())).await?;
            let mut fresh = 0usize;

            for candidate in page.candidates {
                if found.len() >= target {
                    break;
                }
                if !seen_links.insert(candidate.link.clone()) {
                    continue;
                }
                let key = normalize_item_key(&candidate.item_id);
                if seen_ids.contains(&key) || !accept(&candidate) {
                    continue;
                }

                match self.cache.never_resend(&candidate.item_id).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(
                            item_id = %candidate.item_id,
                            error = %e,
                            "Dedup cache lookup failed, skipping item"
                        );
                        telemetry::record_cache_error("finder");
                        continue;
                    }
                }

                seen_ids.insert(key);
                found.push(candidate);
                fresh += 1;
            }

            debug!(page = pages, fresh, total = found.len(), "Search page processed");

            if found.len() >= target || !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(found = found.len(), pages, "New-item search finished");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::DedupConfig;
    use crate::dedup::MemoryDedupStore;
    use crate::marketplace::SearchPage;
    use crate::models::MarketplaceKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves pre-built pages by cursor and records every requested cursor
    struct PagedAdapter {
        pages: Vec<SearchPage>,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl PagedAdapter {
        fn new(pages: Vec<Vec<Candidate>>) -> Self {
            let count = pages.len();
            let pages = pages
                .into_iter()
                .enumerate()
                .map(|(i, candidates)| SearchPage {
                    candidates,
                    next_cursor: (i + 1 < count).then(|| (i + 2).to_string()),
                    has_more: i + 1 < count,
                })
                .collect();
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<Option<String>> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketplaceAdapter for PagedAdapter {
        fn kind(&self) -> MarketplaceKind {
            MarketplaceKind::Shopee
        }

        async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ConfigurationError> {
            self.requested.lock().unwrap().push(query.cursor.clone());
            let index = query
                .cursor
                .as_deref()
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(1)
                - 1;
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }

        fn affiliate_link(&self, raw_link: &str) -> String {
            raw_link.to_string()
        }
    }

    fn candidate(id: &str) -> Candidate {
        Candidate {
            item_id: id.to_string(),
            name: format!("Item {}", id),
            price: 10.0,
            original_price: None,
            link: format!("https://shop/{}", id),
            rating: Some(4.8),
            image_url: None,
            category: None,
            subcategory: None,
            inferred_category: None,
            commission: 1.0,
            score: 0.5,
        }
    }

    fn cache() -> DedupCache {
        DedupCache::new(
            Arc::new(MemoryDedupStore::new()),
            Arc::new(SystemClock),
            &DedupConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_stops_at_target_without_next_page() {
        let adapter = Arc::new(PagedAdapter::new(vec![
            vec![candidate("1"), candidate("2"), candidate("3")],
            vec![candidate("4")],
        ]));
        let finder = NewItemFinder::new(adapter.clone(), cache(), 50);

        let found = finder.find_new(&SearchQuery::new("fone"), 2).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(adapter.requested(), vec![None]);
    }

    #[tokio::test]
    async fn test_skips_already_sent_items_and_keeps_paging() {
        let cache = cache();
        cache.record("1", 10.0, None, None).await.unwrap();
        cache.record("2", 10.0, None, None).await.unwrap();

        let adapter = Arc::new(PagedAdapter::new(vec![
            vec![candidate("1"), candidate("2")],
            vec![candidate("3")],
        ]));
        let finder = NewItemFinder::new(adapter.clone(), cache, 50);

        let found = finder.find_new(&SearchQuery::new("fone"), 5).await.unwrap();

        let ids: Vec<&str> = found.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
        assert_eq!(adapter.requested(), vec![None, Some("2".to_string())]);
    }

    #[tokio::test]
    async fn test_price_change_does_not_revive_item_at_page_stage() {
        let cache = cache();
        cache.record("1", 99.0, None, None).await.unwrap();

        let adapter = Arc::new(PagedAdapter::new(vec![vec![candidate("1")]]));
        let finder = NewItemFinder::new(adapter, cache, 50);

        assert!(finder.find_new(&SearchQuery::new("x"), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dedupes_links_across_pages() {
        let mut relisted = candidate("9");
        relisted.link = candidate("1").link;

        let adapter = Arc::new(PagedAdapter::new(vec![
            vec![candidate("1"), candidate("1")],
            vec![relisted, candidate("2")],
        ]));
        let finder = NewItemFinder::new(adapter, cache(), 50);

        let found = finder.find_new(&SearchQuery::new("x"), 10).await.unwrap();

        let ids: Vec<&str> = found.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_page_budget_is_respected() {
        let pages: Vec<Vec<Candidate>> = (0..10).map(|_| Vec::new()).collect();
        let adapter = Arc::new(PagedAdapter::new(pages));
        let finder = NewItemFinder::new(adapter.clone(), cache(), 3);

        let found = finder.find_new(&SearchQuery::new("x"), 1).await.unwrap();

        assert!(found.is_empty());
        assert_eq!(adapter.requested().len(), 3);
    }

    #[tokio::test]
    async fn test_predicate_controls_what_counts() {
        let mut low = candidate("1");
        low.rating = Some(3.0);
        let adapter = Arc::new(PagedAdapter::new(vec![
            vec![low, candidate("2"), candidate("3")],
            vec![candidate("4")],
        ]));
        let finder = NewItemFinder::new(adapter.clone(), cache(), 50);

        let found = finder
            .find_new_matching(&SearchQuery::new("x"), 2, |c| {
                c.rating.map_or(true, |r| r >= 4.5)
            })
            .await
            .unwrap();

        let ids: Vec<&str> = found.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(adapter.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_target_makes_no_request() {
        let adapter = Arc::new(PagedAdapter::new(vec![vec![candidate("1")]]));
        let finder = NewItemFinder::new(adapter.clone(), cache(), 50);

        assert!(finder.find_new(&SearchQuery::new("x"), 0).await.unwrap().is_empty());
        assert!(adapter.requested().is_empty());
    }
}
