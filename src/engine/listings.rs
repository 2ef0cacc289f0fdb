//! Sell-side pricing engine.
//!
//! Keeps each tracked token listed as the cheapest listing in its scope,
//! within the owner's price bounds. Three competitive states drive the
//! decision: no competition (list at the default price), a competitor at
//! or above the floor (undercut it), and a market that has fallen below
//! the floor (hold the floor with a short horizon and wait for recovery).

use alloy_primitives::{Address, U256};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::engine::feed::{OrderFeed, OrderFilter};
use crate::engine::{enforce_min_expiration, expiration_from_unix};
use crate::marketplace::{ListingRequest, Marketplace, OrderQuery};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{is_eth_equivalent, TrackedListingTarget};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Undercuts round down to this granularity before subtracting the
/// margin, so the result stays strictly below the competitor after the
/// marketplace's own display rounding.
const UNDERCUT_ROUNDING_WEI: u64 = 1000;

/// Fixed margin subtracted from the rounded competitor price.
const UNDERCUT_MARGIN_WEI: u64 = 1000;

/// Horizon for listings created without competition: 5 months.
const DEFAULT_HORIZON_DAYS: i64 = 150;

/// Horizon for floor listings while the market sits below the floor;
/// short so the price is re-evaluated frequently once the market recovers.
const FLOOR_HORIZON_HOURS: i64 = 12;

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why a listing is being (re)submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListReason {
    NoCompetition,
    Undercut,
    FloorFallback,
}

/// Outcome of evaluating one listing target against the market.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingDecision {
    /// The owner already holds the cheapest listing.
    AlreadyBest { competing: U256 },
    /// The best competitor is priced in a currency the engine cannot
    /// compare; no conversion is attempted.
    UnsupportedCurrency { currency: String },
    /// Market is below the floor but the owner's listing already sits
    /// at or below it.
    FloorHeld { own_price: U256 },
    /// Create or reprice the listing.
    List {
        price: U256,
        expiration: DateTime<Utc>,
        reason: ListReason,
    },
}

/// The undercut formula: round the competitor down to the rounding
/// granularity, subtract the fixed margin, and clamp to the default
/// price so an expensive market never pushes the listing above it.
pub fn undercut_price(competing: U256, default_price: U256) -> U256 {
    let step = U256::from(UNDERCUT_ROUNDING_WEI);
    let rounded = (competing / step) * step;
    rounded
        .saturating_sub(U256::from(UNDERCUT_MARGIN_WEI))
        .min(default_price)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ListingEngine<'a> {
    pub market: &'a dyn Marketplace,
    pub retry: &'a RetryPolicy,
    pub owner: Address,
    pub dry_run: bool,
}

impl ListingEngine<'_> {
    /// Evaluate one target and, unless the decision is a hold, submit.
    pub async fn run_target(&self, target: &TrackedListingTarget) -> Result<()> {
        match self.evaluate(target).await? {
            ListingDecision::AlreadyBest { competing } => {
                info!(
                    target = %target,
                    competing = %competing,
                    "Own listing is already the cheapest, holding"
                );
            }
            ListingDecision::UnsupportedCurrency { currency } => {
                info!(
                    target = %target,
                    currency = %currency,
                    "Best competing listing uses an unsupported currency, skipping"
                );
            }
            ListingDecision::FloorHeld { own_price } => {
                info!(
                    target = %target,
                    own_price = %own_price,
                    min_price = %target.min_price,
                    "Market below floor, own listing already holds it"
                );
            }
            ListingDecision::List {
                price,
                expiration,
                reason,
            } => {
                self.submit(target, price, expiration, reason).await?;
            }
        }
        Ok(())
    }

    /// The decision state machine, with no side effects beyond queries.
    pub async fn evaluate(&self, target: &TrackedListingTarget) -> Result<ListingDecision> {
        let feed = OrderFeed::new(self.market, self.retry);
        let (query, filter) = Self::competing_scope(target);
        let now = Utc::now();

        let Some(best) = feed.best_listing(&query, &filter).await? else {
            return Ok(ListingDecision::List {
                price: target.default_price,
                expiration: now + Duration::days(DEFAULT_HORIZON_DAYS),
                reason: ListReason::NoCompetition,
            });
        };

        if !is_eth_equivalent(&best.price_currency) {
            return Ok(ListingDecision::UnsupportedCurrency {
                currency: best.price_currency,
            });
        }

        if best.maker == self.owner {
            return Ok(ListingDecision::AlreadyBest {
                competing: best.price_per_item(),
            });
        }

        let competing = best.price_per_item();
        if competing >= target.min_price {
            return Ok(ListingDecision::List {
                price: undercut_price(competing, target.default_price),
                expiration: expiration_from_unix(
                    best.end_time,
                    now + Duration::days(DEFAULT_HORIZON_DAYS),
                ),
                reason: ListReason::Undercut,
            });
        }

        // Market has fallen below the floor. Hold if our listing is
        // already there, otherwise (re)list at exactly the floor with a
        // short horizon.
        info!(
            target = %target,
            competing = %competing,
            min_price = %target.min_price,
            "Best competing listing is below the configured floor"
        );
        let own_query = OrderQuery::collection(
            &target.chain,
            &target.collection_slug,
            target.token_address,
        )
        .with_token(target.token_id)
        .with_maker(self.owner)
        .sorted();
        let own_filter = OrderFilter::for_token(target.token_id).by_maker(self.owner);
        if let Some(own) = feed.best_listing(&own_query, &own_filter).await? {
            let own_price = own.price_per_item();
            if own_price <= target.min_price {
                return Ok(ListingDecision::FloorHeld { own_price });
            }
        }

        Ok(ListingDecision::List {
            price: target.min_price,
            expiration: now + Duration::hours(FLOOR_HORIZON_HOURS),
            reason: ListReason::FloorFallback,
        })
    }

    fn competing_scope(target: &TrackedListingTarget) -> (OrderQuery, OrderFilter) {
        let query = OrderQuery::collection(
            &target.chain,
            &target.collection_slug,
            target.token_address,
        );
        if target.compare_across_collection {
            (query, OrderFilter::any())
        } else {
            (
                query.with_token(target.token_id).sorted(),
                OrderFilter::for_token(target.token_id),
            )
        }
    }

    async fn submit(
        &self,
        target: &TrackedListingTarget,
        price: U256,
        expiration: DateTime<Utc>,
        reason: ListReason,
    ) -> Result<()> {
        let expiration = enforce_min_expiration(expiration, Utc::now());

        if self.dry_run {
            info!(
                target = %target,
                price = %price,
                expiration = %expiration,
                reason = ?reason,
                "[DRY RUN] Would submit listing"
            );
            return Ok(());
        }

        let request = ListingRequest {
            chain: target.chain.clone(),
            token_address: target.token_address,
            token_id: target.token_id,
            price,
            expiration,
            account: self.owner,
        };
        let handle = with_retry(self.retry, "create_listing", || async {
            self.market.create_listing(&request).await
        })
        .await?;

        info!(
            target = %target,
            price = %price,
            expiration = %expiration,
            reason = ?reason,
            order_hash = ?handle.order_hash,
            "Listing submitted"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
