//! Best-order selection over paged order feeds.
//!
//! Walks a possibly multi-page feed of competing orders, filters to the
//! caller's scope, and folds the pages into a single best candidate under
//! an ascending (cheapest listing) or descending (highest offer) ordering.
//!
//! Pagination is an explicit cursor loop with a best-so-far accumulator —
//! stack-safe no matter how many pages the collection has. When the scope
//! is a single token the server can pre-filter and price-sort, so the
//! first match short-circuits the walk; if the server rejects sorting for
//! the scope, the walk falls back to full pagination. The sorted path is
//! always primary and the paginated path strictly its fallback.

use alloy_primitives::{Address, U256};
use anyhow::Result;
use tracing::{debug, warn};

use crate::marketplace::{is_sort_unsupported, Marketplace, OrderQuery};
use crate::retry::{with_rate_limit_retry, with_retry, RetryPolicy};
use crate::types::{CompetingOrder, OrderPage, PriceOrdering};

// ---------------------------------------------------------------------------
// Scope filter
// ---------------------------------------------------------------------------

/// Client-side filter applied to every fetched order.
///
/// Zero-price orders (invalid or burned) are always excluded. Maker
/// comparison happens on parsed `Address` values, which normalizes
/// checksum casing.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub token_id: Option<U256>,
    pub maker: Option<Address>,
}

impl OrderFilter {
    /// No restriction beyond the nonzero-price rule.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_token(token_id: U256) -> Self {
        Self {
            token_id: Some(token_id),
            maker: None,
        }
    }

    pub fn by_maker(mut self, maker: Address) -> Self {
        self.maker = Some(maker);
        self
    }

    pub fn matches(&self, order: &CompetingOrder) -> bool {
        if order.price_per_item().is_zero() {
            return false;
        }
        if let Some(maker) = self.maker {
            if order.maker != maker {
                return false;
            }
        }
        if let Some(token_id) = self.token_id {
            // Criteria-scoped orders cover any matching token; the server
            // decides membership, so only specific-token orders are
            // checked against the id here.
            let criteria_scoped = order
                .protocol
                .offer
                .iter()
                .chain(order.protocol.consideration.iter())
                .any(|item| item.is_criteria());
            if !criteria_scoped && !order.protocol.includes_token(token_id) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookSide {
    Listings,
    Offers,
}

impl BookSide {
    fn label(&self) -> &'static str {
        match self {
            BookSide::Listings => "listings_page",
            BookSide::Offers => "offers_page",
        }
    }
}

/// Read access to the order book, with retry composition baked in:
/// rate-limit retry runs inside generic transient-failure retry, so the
/// two concerns back off independently.
pub struct OrderFeed<'a> {
    market: &'a dyn Marketplace,
    retry: &'a RetryPolicy,
}

impl<'a> OrderFeed<'a> {
    pub fn new(market: &'a dyn Marketplace, retry: &'a RetryPolicy) -> Self {
        Self { market, retry }
    }

    /// The cheapest competing listing in scope, or `None`.
    pub async fn best_listing(
        &self,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Option<CompetingOrder>> {
        self.best(BookSide::Listings, PriceOrdering::Ascending, query, filter)
            .await
    }

    /// The highest competing offer in scope, or `None`.
    pub async fn best_offer(
        &self,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Option<CompetingOrder>> {
        self.best(BookSide::Offers, PriceOrdering::Descending, query, filter)
            .await
    }

    /// Every offer in scope passing the filter, across all pages.
    /// Used by the redundant-offer reconciliation.
    pub async fn collect_offers(
        &self,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Vec<CompetingOrder>> {
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.page(BookSide::Offers, query, cursor).await?;
            collected.extend(page.orders.into_iter().filter(|o| filter.matches(o)));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(collected)
    }

    async fn best(
        &self,
        side: BookSide,
        ordering: PriceOrdering,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Option<CompetingOrder>> {
        // Primary strategy: a single-token scope is pre-filtered and
        // price-sorted server-side, so the first match is the answer.
        if query.sort_by_price && query.token_id.is_some() {
            match self.first_match(side, query, filter).await {
                Ok(found) => return Ok(found),
                Err(err) if is_sort_unsupported(&err) => {
                    warn!(
                        collection = %query.collection_slug,
                        "Server cannot price-sort this scope, falling back to full pagination"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let mut unsorted = query.clone();
        unsorted.sort_by_price = false;
        self.paginate_best(side, ordering, &unsorted, filter).await
    }

    async fn first_match(
        &self,
        side: BookSide,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Option<CompetingOrder>> {
        let page = self.page(side, query, None).await?;
        Ok(page.orders.into_iter().find(|o| filter.matches(o)))
    }

    /// Iterative cursor walk folding a best-so-far candidate. Ties keep
    /// the first-seen order.
    async fn paginate_best(
        &self,
        side: BookSide,
        ordering: PriceOrdering,
        query: &OrderQuery,
        filter: &OrderFilter,
    ) -> Result<Option<CompetingOrder>> {
        let mut best: Option<CompetingOrder> = None;
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.page(side, query, cursor).await?;
            pages += 1;
            for order in page.orders {
                if !filter.matches(&order) {
                    continue;
                }
                let replace = match &best {
                    Some(incumbent) => {
                        ordering.prefers(order.price_per_item(), incumbent.price_per_item())
                    }
                    None => true,
                };
                if replace {
                    best = Some(order);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            side = side.label(),
            pages,
            found = best.is_some(),
            "Order aggregation complete"
        );
        Ok(best)
    }

    async fn page(
        &self,
        side: BookSide,
        query: &OrderQuery,
        cursor: Option<String>,
    ) -> Result<OrderPage> {
        with_retry(self.retry, side.label(), || {
            let cursor = cursor.clone();
            async move {
                with_rate_limit_retry(self.retry, side.label(), || {
                    let cursor = cursor.clone();
                    async move {
                        match side {
                            BookSide::Listings => self.market.listings_page(query, cursor).await,
                            BookSide::Offers => self.market.offers_page(query, cursor).await,
                        }
                    }
                })
                .await
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{MarketplaceError, MockMarketplace};
    use crate::orders::{OrderItem, ProtocolOrder, ITEM_ERC721, ITEM_ERC721_WITH_CRITERIA};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RetryPolicy::default()
        }
    }

    fn maker(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn order(price: u64, by: Address) -> CompetingOrder {
        CompetingOrder {
            order_hash: Some(format!("0x{price:x}")),
            maker: by,
            price_total: U256::from(price),
            price_currency: "ETH".into(),
            quantity: U256::from(1u64),
            end_time: 0,
            start_time: 0,
            protocol: ProtocolOrder::default(),
        }
    }

    fn page(prices: &[u64], next: Option<&str>) -> OrderPage {
        OrderPage {
            orders: prices.iter().map(|p| order(*p, maker(9))).collect(),
            next_cursor: next.map(String::from),
        }
    }

    fn two_page_market() -> MockMarketplace {
        // Pages [[5, 3], [7, 1]] keyed by cursor.
        let mut market = MockMarketplace::new();
        market.expect_listings_page().returning(|_, cursor| {
            Ok(match cursor.as_deref() {
                None => page(&[5, 3], Some("p2")),
                Some("p2") => page(&[7, 1], None),
                other => panic!("unexpected cursor {other:?}"),
            })
        });
        market.expect_offers_page().returning(|_, cursor| {
            Ok(match cursor.as_deref() {
                None => page(&[5, 3], Some("p2")),
                Some("p2") => page(&[7, 1], None),
                other => panic!("unexpected cursor {other:?}"),
            })
        });
        market
    }

    fn collection_query() -> OrderQuery {
        OrderQuery::collection("ethereum", "test", Address::ZERO)
    }

    #[tokio::test]
    async fn test_ascending_aggregation_selects_cheapest_across_pages() {
        let market = two_page_market();
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let best = feed
            .best_listing(&collection_query(), &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.price_per_item(), U256::from(1u64));
    }

    #[tokio::test]
    async fn test_descending_aggregation_selects_highest_across_pages() {
        let market = two_page_market();
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let best = feed
            .best_offer(&collection_query(), &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.price_per_item(), U256::from(7u64));
    }

    #[tokio::test]
    async fn test_aggregation_idempotent_with_stable_tie_break() {
        // Two orders at the same price on different pages: the first-seen
        // one must win, on every run.
        let mut market = MockMarketplace::new();
        market.expect_listings_page().returning(|_, cursor| {
            Ok(match cursor.as_deref() {
                None => OrderPage {
                    orders: vec![order(4, maker(1))],
                    next_cursor: Some("p2".into()),
                },
                Some("p2") => OrderPage {
                    orders: vec![order(4, maker(2))],
                    next_cursor: None,
                },
                other => panic!("unexpected cursor {other:?}"),
            })
        });
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);

        let first = feed
            .best_listing(&collection_query(), &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        let second = feed
            .best_listing(&collection_query(), &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.maker, maker(1));
        assert_eq!(second.maker, maker(1));
    }

    #[tokio::test]
    async fn test_zero_price_orders_excluded() {
        let mut market = MockMarketplace::new();
        market
            .expect_listings_page()
            .returning(|_, _| Ok(page(&[0, 0], None)));
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let best = feed
            .best_listing(&collection_query(), &OrderFilter::any())
            .await
            .unwrap();
        assert!(best.is_none());
    }

    #[tokio::test]
    async fn test_maker_filter_selects_only_that_account() {
        let mut market = MockMarketplace::new();
        market.expect_listings_page().returning(|_, _| {
            Ok(OrderPage {
                orders: vec![order(3, maker(1)), order(5, maker(2))],
                next_cursor: None,
            })
        });
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let best = feed
            .best_listing(
                &collection_query(),
                &OrderFilter::any().by_maker(maker(2)),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.maker, maker(2));
        assert_eq!(best.price_per_item(), U256::from(5u64));
    }

    #[tokio::test]
    async fn test_sorted_single_token_path_short_circuits() {
        let mut market = MockMarketplace::new();
        // Exactly one fetch: the sorted page, first match returned, no
        // pagination even though a cursor is present.
        market
            .expect_listings_page()
            .times(1)
            .returning(|query, cursor| {
                assert!(query.sort_by_price);
                assert!(cursor.is_none());
                Ok(page(&[3, 5], Some("never-followed")))
            });
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let query = collection_query().with_token(U256::from(1u64)).sorted();
        let best = feed
            .best_listing(&query, &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.price_per_item(), U256::from(3u64));
    }

    #[tokio::test]
    async fn test_sort_unsupported_falls_back_to_pagination() {
        let mut market = MockMarketplace::new();
        market.expect_listings_page().returning(|query, cursor| {
            if query.sort_by_price {
                Err(MarketplaceError::SortUnsupported(
                    "this scope cannot be sorted by price".into(),
                )
                .into())
            } else {
                Ok(match cursor.as_deref() {
                    None => page(&[5, 3], Some("p2")),
                    Some("p2") => page(&[7, 1], None),
                    other => panic!("unexpected cursor {other:?}"),
                })
            }
        });
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let query = collection_query().with_token(U256::from(1u64)).sorted();
        let best = feed
            .best_listing(&query, &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.price_per_item(), U256::from(1u64));
    }

    #[tokio::test]
    async fn test_other_errors_propagate_from_sorted_path() {
        let mut market = MockMarketplace::new();
        market
            .expect_listings_page()
            .returning(|_, _| Err(MarketplaceError::Api {
                status: 400,
                message: "bad request".into(),
            }
            .into()));
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let query = collection_query().with_token(U256::from(1u64)).sorted();
        assert!(feed
            .best_listing(&query, &OrderFilter::any())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_pagination_survives_hundreds_of_pages() {
        let mut market = MockMarketplace::new();
        market.expect_offers_page().returning(|_, cursor| {
            let index: u64 = cursor.as_deref().map_or(0, |c| c.parse().unwrap());
            let next = if index < 300 {
                Some((index + 1).to_string())
            } else {
                None
            };
            Ok(OrderPage {
                orders: vec![order(index + 1, maker(9))],
                next_cursor: next,
            })
        });
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let best = feed
            .best_offer(&collection_query(), &OrderFilter::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.price_per_item(), U256::from(301u64));
    }

    #[tokio::test]
    async fn test_token_filter_accepts_criteria_orders() {
        let specific = CompetingOrder {
            protocol: ProtocolOrder {
                offer: vec![],
                consideration: vec![OrderItem {
                    item_type: ITEM_ERC721,
                    identifier: U256::from(42u64),
                    start_amount: U256::from(1u64),
                    end_amount: U256::from(1u64),
                }],
            },
            ..order(5, maker(1))
        };
        let criteria = CompetingOrder {
            protocol: ProtocolOrder {
                offer: vec![],
                consideration: vec![OrderItem {
                    item_type: ITEM_ERC721_WITH_CRITERIA,
                    identifier: U256::ZERO,
                    start_amount: U256::from(1u64),
                    end_amount: U256::from(1u64),
                }],
            },
            ..order(6, maker(2))
        };
        let wrong_token = CompetingOrder {
            protocol: ProtocolOrder {
                offer: vec![],
                consideration: vec![OrderItem {
                    item_type: ITEM_ERC721,
                    identifier: U256::from(7u64),
                    start_amount: U256::from(1u64),
                    end_amount: U256::from(1u64),
                }],
            },
            ..order(9, maker(3))
        };

        let filter = OrderFilter::for_token(U256::from(42u64));
        assert!(filter.matches(&specific));
        assert!(filter.matches(&criteria));
        assert!(!filter.matches(&wrong_token));
    }

    #[tokio::test]
    async fn test_collect_offers_gathers_all_pages() {
        let market = two_page_market();
        let retry = fast_retry();
        let feed = OrderFeed::new(&market, &retry);
        let offers = feed
            .collect_offers(&collection_query(), &OrderFilter::any())
            .await
            .unwrap();
        assert_eq!(offers.len(), 4);
    }
}
