//! Cycle orchestration.
//!
//! Three concerns poll independently: listings, offers, and stale-offer
//! cleanup. Within a cycle, targets are evaluated strictly sequentially
//! and each target's failure is caught and logged here so it never
//! aborts the rest of the cycle.

pub mod cleanup;
pub mod feed;
pub mod listings;
pub mod offers;

use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use tracing::error;

use crate::chain::ChainRegistry;
use crate::marketplace::Marketplace;
use crate::retry::RetryPolicy;
use crate::types::{TrackedListingTarget, TrackedOfferTarget};
use self::cleanup::OfferJanitor;
use self::listings::ListingEngine;
use self::offers::OfferEngine;

/// Marketplace-imposed minimum: submissions must expire at least this
/// many minutes out.
const MIN_EXPIRATION_MINUTES: i64 = 11;

/// Clamp a requested expiration up to the marketplace minimum.
pub(crate) fn enforce_min_expiration(
    requested: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    requested.max(now + Duration::minutes(MIN_EXPIRATION_MINUTES))
}

/// Interpret a competing order's end time, falling back when the feed
/// carried no usable timestamp.
pub(crate) fn expiration_from_unix(unix_secs: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if unix_secs <= 0 {
        return fallback;
    }
    DateTime::from_timestamp(unix_secs, 0).unwrap_or(fallback)
}

// ---------------------------------------------------------------------------
// Maker
// ---------------------------------------------------------------------------

/// Shared handles for one maker process: the marketplace client, the
/// chain registry, the retry schedule, the owner identity, and the
/// dry-run switch. Cloned into each polling loop; all state is read-only
/// after construction.
#[derive(Clone)]
pub struct Maker {
    market: Arc<dyn Marketplace>,
    chains: Arc<ChainRegistry>,
    retry: RetryPolicy,
    owner: Address,
    dry_run: bool,
}

impl Maker {
    pub fn new(
        market: Arc<dyn Marketplace>,
        chains: Arc<ChainRegistry>,
        retry: RetryPolicy,
        owner: Address,
        dry_run: bool,
    ) -> Self {
        Self {
            market,
            chains,
            retry,
            owner,
            dry_run,
        }
    }

    /// One listings pass over every tracked listing target.
    pub async fn listing_cycle(&self, targets: &[TrackedListingTarget]) {
        let engine = ListingEngine {
            market: self.market.as_ref(),
            retry: &self.retry,
            owner: self.owner,
            dry_run: self.dry_run,
        };
        for target in targets {
            if let Err(err) = engine.run_target(target).await {
                error!(
                    target = %target,
                    error = format!("{err:#}"),
                    "Listing evaluation failed, continuing with next target"
                );
            }
        }
    }

    /// One offers pass over every tracked offer target.
    pub async fn offer_cycle(&self, targets: &[TrackedOfferTarget]) {
        let engine = OfferEngine {
            market: self.market.as_ref(),
            retry: &self.retry,
            chains: self.chains.as_ref(),
            owner: self.owner,
            dry_run: self.dry_run,
        };
        for target in targets {
            if let Err(err) = engine.run_target(target).await {
                error!(
                    target = %target,
                    error = format!("{err:#}"),
                    "Offer evaluation failed, continuing with next target"
                );
            }
        }
    }

    /// One redundant-offer reconciliation pass.
    pub async fn cleanup_cycle(&self, targets: &[TrackedOfferTarget]) {
        let janitor = OfferJanitor {
            market: self.market.as_ref(),
            retry: &self.retry,
            owner: self.owner,
            dry_run: self.dry_run,
        };
        janitor.run(targets).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
