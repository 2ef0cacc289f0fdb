//! Buy-side pricing engine.
//!
//! Keeps the best offer on each tracked scope (single token, whole
//! collection, or trait subset) within the owner's bounds. The mirror
//! image of the listing engine: outbid upward instead of undercutting
//! downward, capped at `max_price` instead of floored at `min_price`.
//!
//! Offers settle in the chain's WETH-equivalent — native-currency offers
//! are not universally supported — and quantity-bearing offers may hit
//! the marketplace's 3-decimal price limit, which is recovered by one
//! retry at the next 3-decimal increment above the computed price.

use alloy_primitives::{Address, U256};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::chain::ChainRegistry;
use crate::engine::feed::{OrderFeed, OrderFilter};
use crate::engine::{enforce_min_expiration, expiration_from_unix};
use crate::marketplace::{
    is_precision_rejected, CollectionOfferRequest, Marketplace, OrderHandle, OrderQuery,
    TokenOfferRequest,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{OfferScope, TrackedOfferTarget};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The smallest price step the marketplace accepts: 0.0001 of the native
/// unit, as a fixed lower bound on the outbid increment.
const OUTBID_INCREMENT_WEI: u64 = 100_000_000_000_000;

/// 0.001 of the native unit — the granularity quantity-bearing offers
/// are rounded up to when the marketplace rejects 4-decimal precision.
const THREE_DECIMAL_STEP_WEI: u64 = 1_000_000_000_000_000;

/// Horizon for offers created without competition: 5 months.
const DEFAULT_HORIZON_DAYS: i64 = 150;

/// Horizon while the market sits above the ceiling; short so the offer
/// is re-evaluated frequently once the market falls back.
const CAPPED_HORIZON_HOURS: i64 = 12;

// ---------------------------------------------------------------------------
// Price math
// ---------------------------------------------------------------------------

/// The outbid formula: one increment above the competitor, clamped up to
/// the default price so a cheap market never drags the offer below it.
pub fn outbid_price(competing: U256, default_price: U256) -> U256 {
    competing
        .saturating_add(U256::from(OUTBID_INCREMENT_WEI))
        .max(default_price)
}

/// Round a per-item price up to the next 3-decimal increment. Rounding
/// up, never down, so the deliberate outbid increment is never collapsed
/// back into a tie with the competitor.
pub fn round_up_to_three_decimals(price: U256) -> U256 {
    let step = U256::from(THREE_DECIMAL_STEP_WEI);
    let remainder = price % step;
    if remainder.is_zero() {
        price
    } else {
        price - remainder + step
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why an offer is being (re)submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferReason {
    NoCompetition,
    Outbid,
    CappedAtMax,
}

/// Outcome of evaluating one offer target against the market.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferDecision {
    /// The owner already holds the highest offer.
    AlreadyBest { competing: U256 },
    /// Market is above the ceiling but the owner's offer already sits
    /// at or above it.
    CapHeld { own_price: U256 },
    /// Create or reprice the offer at this per-item price.
    Bid {
        price_per_item: U256,
        expiration: DateTime<Utc>,
        reason: OfferReason,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct OfferEngine<'a> {
    pub market: &'a dyn Marketplace,
    pub retry: &'a RetryPolicy,
    pub chains: &'a ChainRegistry,
    pub owner: Address,
    pub dry_run: bool,
}

impl OfferEngine<'_> {
    /// Evaluate one target and, unless the decision is a hold, submit.
    pub async fn run_target(&self, target: &TrackedOfferTarget) -> Result<()> {
        match self.evaluate(target).await? {
            OfferDecision::AlreadyBest { competing } => {
                info!(
                    target = %target,
                    competing = %competing,
                    "Own offer is already the highest, holding"
                );
            }
            OfferDecision::CapHeld { own_price } => {
                info!(
                    target = %target,
                    own_price = %own_price,
                    max_price = %target.max_price,
                    "Market above ceiling, own offer already holds it"
                );
            }
            OfferDecision::Bid {
                price_per_item,
                expiration,
                reason,
            } => {
                self.submit(target, price_per_item, expiration, reason).await?;
            }
        }
        Ok(())
    }

    /// The decision state machine, with no side effects beyond queries.
    pub async fn evaluate(&self, target: &TrackedOfferTarget) -> Result<OfferDecision> {
        let feed = OrderFeed::new(self.market, self.retry);
        let (query, filter) = Self::competing_scope(target);
        let now = Utc::now();

        let Some(best) = feed.best_offer(&query, &filter).await? else {
            return Ok(OfferDecision::Bid {
                price_per_item: target.default_price,
                expiration: now + Duration::days(DEFAULT_HORIZON_DAYS),
                reason: OfferReason::NoCompetition,
            });
        };

        if best.maker == self.owner {
            return Ok(OfferDecision::AlreadyBest {
                competing: best.price_per_item(),
            });
        }

        let competing = best.price_per_item();
        if competing <= target.max_price {
            return Ok(OfferDecision::Bid {
                price_per_item: outbid_price(competing, target.default_price),
                expiration: expiration_from_unix(
                    best.end_time,
                    now + Duration::days(DEFAULT_HORIZON_DAYS),
                ),
                reason: OfferReason::Outbid,
            });
        }

        // Market has climbed above the ceiling. Hold if our offer is
        // already there, otherwise sit at exactly the ceiling with a
        // short horizon.
        info!(
            target = %target,
            competing = %competing,
            max_price = %target.max_price,
            "Best competing offer is above the configured ceiling"
        );
        let (own_query, own_filter) = Self::own_scope(target, self.owner);
        if let Some(own) = feed.best_offer(&own_query, &own_filter).await? {
            let own_price = own.price_per_item();
            if own_price >= target.max_price {
                return Ok(OfferDecision::CapHeld { own_price });
            }
        }

        Ok(OfferDecision::Bid {
            price_per_item: target.max_price,
            expiration: now + Duration::hours(CAPPED_HORIZON_HOURS),
            reason: OfferReason::CappedAtMax,
        })
    }

    fn competing_scope(target: &TrackedOfferTarget) -> (OrderQuery, OrderFilter) {
        let base = OrderQuery::collection(
            &target.chain,
            &target.collection_slug,
            target.token_address,
        );
        match (&target.scope, target.compare_across_collection) {
            (OfferScope::Token(id), false) => {
                (base.with_token(*id).sorted(), OrderFilter::for_token(*id))
            }
            (OfferScope::Token(_), true) => (base, OrderFilter::any()),
            (OfferScope::Collection, _) => (base, OrderFilter::any()),
            (OfferScope::Trait(criterion), _) => {
                (base.with_criterion(criterion.clone()), OrderFilter::any())
            }
        }
    }

    pub(crate) fn own_scope(
        target: &TrackedOfferTarget,
        owner: Address,
    ) -> (OrderQuery, OrderFilter) {
        let (query, filter) = Self::competing_scope(target);
        (query.unsorted().with_maker(owner), filter.by_maker(owner))
    }

    async fn submit(
        &self,
        target: &TrackedOfferTarget,
        price_per_item: U256,
        expiration: DateTime<Utc>,
        reason: OfferReason,
    ) -> Result<()> {
        let chain = self.chains.require(&target.chain)?;
        let payment_token = chain.payment_token();
        let expiration = enforce_min_expiration(expiration, Utc::now());

        if self.dry_run {
            info!(
                target = %target,
                price_per_item = %price_per_item,
                quantity = target.quantity,
                expiration = %expiration,
                reason = ?reason,
                "[DRY RUN] Would submit offer"
            );
            return Ok(());
        }

        let handle = self
            .create_with_precision_fallback(target, price_per_item, payment_token, expiration)
            .await?;

        info!(
            target = %target,
            price_per_item = %price_per_item,
            submitted_total = %handle.price,
            expiration = %expiration,
            reason = ?reason,
            order_hash = ?handle.order_hash,
            "Offer submitted"
        );
        Ok(())
    }

    /// Attempt the computed price; on a precision rejection, retry once
    /// with the per-item price rounded up to the 3-decimal grid.
    async fn create_with_precision_fallback(
        &self,
        target: &TrackedOfferTarget,
        price_per_item: U256,
        payment_token: Address,
        expiration: DateTime<Utc>,
    ) -> Result<OrderHandle> {
        match self
            .create(target, price_per_item, payment_token, expiration)
            .await
        {
            Ok(handle) => Ok(handle),
            Err(err) if is_precision_rejected(&err) => {
                let rounded = round_up_to_three_decimals(price_per_item);
                warn!(
                    target = %target,
                    rejected = %price_per_item,
                    rounded = %rounded,
                    "Marketplace rejected price precision, retrying at 3 decimals"
                );
                self.create(target, rounded, payment_token, expiration).await
            }
            Err(err) => Err(err),
        }
    }

    async fn create(
        &self,
        target: &TrackedOfferTarget,
        price_per_item: U256,
        payment_token: Address,
        expiration: DateTime<Utc>,
    ) -> Result<OrderHandle> {
        match &target.scope {
            OfferScope::Token(token_id) => {
                let request = TokenOfferRequest {
                    chain: target.chain.clone(),
                    token_address: target.token_address,
                    token_id: *token_id,
                    price: price_per_item,
                    payment_token,
                    expiration,
                    account: self.owner,
                };
                with_retry(self.retry, "create_token_offer", || async {
                    self.market.create_token_offer(&request).await
                })
                .await
            }
            scope => {
                let criterion = match scope {
                    OfferScope::Trait(criterion) => Some(criterion.clone()),
                    _ => None,
                };
                let quantity = target.quantity.max(1);
                let request = CollectionOfferRequest {
                    chain: target.chain.clone(),
                    collection_slug: target.collection_slug.clone(),
                    criterion,
                    price_total: price_per_item.saturating_mul(U256::from(quantity)),
                    quantity,
                    payment_token,
                    expiration,
                    account: self.owner,
                };
                with_retry(self.retry, "create_collection_offer", || async {
                    self.market.create_collection_offer(&request).await
                })
                .await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainHandle;
    use crate::marketplace::{MarketplaceError, MockMarketplace};
    use crate::orders::ProtocolOrder;
    use crate::types::{CompetingOrder, OrderPage, TraitCriterion};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    fn eth(milli: u64) -> U256 {
        // milli-ETH in wei
        U256::from(milli) * U256::from(1_000_000_000_000_000u64)
    }

    fn wei(n: u128) -> U256 {
        U256::from(n)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            base_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    fn owner() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn rival() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn registry() -> ChainRegistry {
        ChainRegistry::from_handles(vec![
            ChainHandle {
                name: "ethereum".into(),
                chain_id: 1,
                rpc_url: String::new(),
            },
            ChainHandle {
                name: "polygon".into(),
                chain_id: 137,
                rpc_url: String::new(),
            },
        ])
    }

    fn token_target() -> TrackedOfferTarget {
        TrackedOfferTarget {
            chain: "ethereum".into(),
            collection_slug: "test-collection".into(),
            token_address: Address::repeat_byte(0x11),
            scope: OfferScope::Token(U256::from(5u64)),
            default_price: eth(100),  // 0.1 ETH
            max_price: eth(200),      // 0.2 ETH
            quantity: 1,
            compare_across_collection: false,
        }
    }

    fn collection_target(quantity: u64) -> TrackedOfferTarget {
        TrackedOfferTarget {
            chain: "ethereum".into(),
            collection_slug: "test-collection".into(),
            token_address: Address::repeat_byte(0x11),
            scope: OfferScope::Collection,
            default_price: eth(100),
            max_price: eth(200),
            quantity,
            compare_across_collection: false,
        }
    }

    fn offer(price: U256, by: Address, end_time: i64) -> CompetingOrder {
        CompetingOrder {
            order_hash: Some("0xoffer".into()),
            maker: by,
            price_total: price,
            price_currency: "WETH".into(),
            quantity: U256::from(1u64),
            end_time,
            start_time: 0,
            protocol: ProtocolOrder::default(),
        }
    }

    fn page_of(orders: Vec<CompetingOrder>) -> OrderPage {
        OrderPage {
            orders,
            next_cursor: None,
        }
    }

    fn engine<'a>(
        market: &'a MockMarketplace,
        retry: &'a RetryPolicy,
        chains: &'a ChainRegistry,
    ) -> OfferEngine<'a> {
        OfferEngine {
            market,
            retry,
            chains,
            owner: owner(),
            dry_run: false,
        }
    }

    // ---- price math ----------------------------------------------------

    #[test]
    fn test_outbid_adds_one_increment() {
        let competing = eth(150);
        let result = outbid_price(competing, eth(100));
        assert_eq!(result, competing + wei(100_000_000_000_000));
    }

    #[test]
    fn test_outbid_clamps_up_to_default() {
        // Competitor far below the default: the default wins.
        let result = outbid_price(wei(100_000_000_000_000), eth(100));
        assert_eq!(result, eth(100));
    }

    #[test]
    fn test_round_up_to_three_decimals() {
        // 0.1001 ETH rounds up to 0.101 ETH
        let price = wei(100_100_000_000_000_000);
        assert_eq!(round_up_to_three_decimals(price), wei(101_000_000_000_000_000));
        // Already on the grid: unchanged
        assert_eq!(round_up_to_three_decimals(eth(101)), eth(101));
        // Never rounds down
        assert!(round_up_to_three_decimals(price) > price);
    }

    // ---- decision states -----------------------------------------------

    #[tokio::test]
    async fn test_no_competition_bids_default() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(OrderPage::default()));
        let retry = fast_retry();
        let chains = registry();
        let decision = engine(&market, &retry, &chains)
            .evaluate(&token_target())
            .await
            .unwrap();
        let OfferDecision::Bid {
            price_per_item,
            reason,
            ..
        } = decision
        else {
            panic!("expected Bid, got {decision:?}");
        };
        assert_eq!(price_per_item, eth(100));
        assert_eq!(reason, OfferReason::NoCompetition);
    }

    #[tokio::test]
    async fn test_own_best_offer_is_a_hold() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(page_of(vec![offer(eth(150), owner(), 0)])));
        // The no-op property: zero submissions of any kind.
        market.expect_create_token_offer().times(0);
        market.expect_create_collection_offer().times(0);
        let retry = fast_retry();
        let chains = registry();
        let eng = engine(&market, &retry, &chains);
        eng.run_target(&token_target()).await.unwrap();
    }

    #[tokio::test]
    async fn test_outbid_at_exact_ceiling_boundary() {
        // Competitor exactly at max_price takes the outbid branch.
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(page_of(vec![offer(eth(200), rival(), 1_900_000_000)])));
        let retry = fast_retry();
        let chains = registry();
        let decision = engine(&market, &retry, &chains)
            .evaluate(&token_target())
            .await
            .unwrap();
        let OfferDecision::Bid {
            price_per_item,
            reason,
            ..
        } = decision
        else {
            panic!("expected Bid, got {decision:?}");
        };
        assert_eq!(reason, OfferReason::Outbid);
        assert_eq!(price_per_item, eth(200) + wei(100_000_000_000_000));
    }

    #[tokio::test]
    async fn test_market_above_ceiling_without_own_offer_bids_max() {
        let mut market = MockMarketplace::new();
        market.expect_offers_page().returning(|query, _| {
            if query.maker.is_some() {
                Ok(OrderPage::default())
            } else {
                Ok(page_of(vec![offer(eth(300), rival(), 0)]))
            }
        });
        let retry = fast_retry();
        let chains = registry();
        let decision = engine(&market, &retry, &chains)
            .evaluate(&token_target())
            .await
            .unwrap();
        let OfferDecision::Bid {
            price_per_item,
            reason,
            ..
        } = decision
        else {
            panic!("expected Bid, got {decision:?}");
        };
        assert_eq!(price_per_item, eth(200));
        assert_eq!(reason, OfferReason::CappedAtMax);
    }

    #[tokio::test]
    async fn test_market_above_ceiling_with_own_cap_offer_holds() {
        let mut market = MockMarketplace::new();
        market.expect_offers_page().returning(|query, _| {
            if query.maker.is_some() {
                Ok(page_of(vec![offer(eth(200), owner(), 0)]))
            } else {
                Ok(page_of(vec![offer(eth(300), rival(), 0)]))
            }
        });
        market.expect_create_token_offer().times(0);
        market.expect_create_collection_offer().times(0);
        let retry = fast_retry();
        let chains = registry();
        let eng = engine(&market, &retry, &chains);
        let decision = eng.evaluate(&token_target()).await.unwrap();
        assert_eq!(
            decision,
            OfferDecision::CapHeld {
                own_price: eth(200)
            }
        );
        eng.run_target(&token_target()).await.unwrap();
    }

    // ---- submission ----------------------------------------------------

    #[tokio::test]
    async fn test_token_offer_uses_price_directly() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(page_of(vec![offer(eth(150), rival(), 0)])));
        let expected = eth(150) + wei(100_000_000_000_000);
        market
            .expect_create_token_offer()
            .times(1)
            .withf(move |req| req.price == expected)
            .returning(|req| {
                Ok(OrderHandle {
                    order_hash: Some("0xnew".into()),
                    price: req.price,
                })
            });
        let retry = fast_retry();
        let chains = registry();
        engine(&market, &retry, &chains)
            .run_target(&token_target())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_collection_offer_multiplies_quantity() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(OrderPage::default()));
        // default 0.1 ETH per item, quantity 3 → 0.3 ETH total
        market
            .expect_create_collection_offer()
            .times(1)
            .withf(|req| {
                req.price_total == U256::from(300_000_000_000_000_000u64)
                    && req.quantity == 3
                    && req.criterion.is_none()
            })
            .returning(|req| {
                Ok(OrderHandle {
                    order_hash: Some("0xnew".into()),
                    price: req.price_total,
                })
            });
        let retry = fast_retry();
        let chains = registry();
        engine(&market, &retry, &chains)
            .run_target(&collection_target(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trait_offer_carries_criterion() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(OrderPage::default()));
        market
            .expect_create_collection_offer()
            .times(1)
            .withf(|req| {
                req.criterion
                    .as_ref()
                    .is_some_and(|c| c.trait_type == "Background" && c.value == "Gold")
            })
            .returning(|req| {
                Ok(OrderHandle {
                    order_hash: None,
                    price: req.price_total,
                })
            });
        let retry = fast_retry();
        let chains = registry();
        let mut target = collection_target(1);
        target.scope = OfferScope::Trait(TraitCriterion {
            trait_type: "Background".into(),
            value: "Gold".into(),
        });
        engine(&market, &retry, &chains)
            .run_target(&target)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_payment_token_resolved_per_chain() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(OrderPage::default()));
        market
            .expect_create_collection_offer()
            .times(1)
            .withf(|req| {
                req.payment_token == crate::chain::wrapped_native_token(137)
            })
            .returning(|req| {
                Ok(OrderHandle {
                    order_hash: None,
                    price: req.price_total,
                })
            });
        let retry = fast_retry();
        let chains = registry();
        let mut target = collection_target(1);
        target.chain = "polygon".into();
        engine(&market, &retry, &chains)
            .run_target(&target)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_chain_is_an_error() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(OrderPage::default()));
        let retry = fast_retry();
        let chains = registry();
        let mut target = collection_target(1);
        target.chain = "unknown-chain".into();
        assert!(engine(&market, &retry, &chains)
            .run_target(&target)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_precision_rejection_retries_rounded_up() {
        let mut market = MockMarketplace::new();
        // Competitor at 0.1001 ETH per item → outbid at 0.1002, which the
        // marketplace rejects; the retry must land at 0.101 (rounded up).
        market.expect_offers_page().returning(|_, _| {
            Ok(page_of(vec![offer(wei(100_100_000_000_000_000), rival(), 0)]))
        });
        let attempts = std::sync::Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        market
            .expect_create_collection_offer()
            .times(2)
            .returning(move |req| {
                let attempt = seen.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    assert_eq!(req.price_total, wei(200_400_000_000_000_000)); // 0.1002 × 2
                    Err(MarketplaceError::PrecisionRejected(
                        "only 3 decimals allowed for collection offers".into(),
                    )
                    .into())
                } else {
                    assert_eq!(req.price_total, wei(202_000_000_000_000_000)); // 0.101 × 2
                    Ok(OrderHandle {
                        order_hash: Some("0xrounded".into()),
                        price: req.price_total,
                    })
                }
            });
        let retry = fast_retry();
        let chains = registry();
        engine(&market, &retry, &chains)
            .run_target(&collection_target(2))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dry_run_never_submits() {
        let mut market = MockMarketplace::new();
        market
            .expect_offers_page()
            .returning(|_, _| Ok(page_of(vec![offer(eth(150), rival(), 0)])));
        market.expect_create_token_offer().times(0);
        market.expect_create_collection_offer().times(0);
        let retry = fast_retry();
        let chains = registry();
        let eng = OfferEngine {
            market: &market,
            retry: &retry,
            chains: &chains,
            owner: owner(),
            dry_run: true,
        };
        eng.run_target(&token_target()).await.unwrap();
    }
}
