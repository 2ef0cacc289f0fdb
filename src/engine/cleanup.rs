//! Redundant-offer reconciliation.
//!
//! Races between polling cycles (or manual intervention) can leave more
//! than one live owned offer on a logically overlapping scope. Per
//! target, the highest-priced offer is the true active one; everything
//! else is cancelled. Cancellations are batched into one call per chain
//! to keep the external call count down.

use std::collections::HashMap;

use alloy_primitives::Address;
use anyhow::Result;
use tracing::{error, info, warn};

use crate::engine::feed::OrderFeed;
use crate::engine::offers::OfferEngine;
use crate::marketplace::Marketplace;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{CompetingOrder, TrackedOfferTarget};

pub struct OfferJanitor<'a> {
    pub market: &'a dyn Marketplace,
    pub retry: &'a RetryPolicy,
    pub owner: Address,
    pub dry_run: bool,
}

/// Pick the order hashes to cancel from a set of owned offers on one
/// scope: everything but the highest per-item price. Offers without a
/// resolvable hash cannot be cancelled and are reported separately.
pub fn redundant_hashes(mut offers: Vec<CompetingOrder>) -> (Vec<String>, usize) {
    if offers.len() <= 1 {
        return (Vec::new(), 0);
    }
    offers.sort_by(|a, b| b.price_per_item().cmp(&a.price_per_item()));

    let mut hashes = Vec::new();
    let mut unresolvable = 0usize;
    for offer in &offers[1..] {
        match &offer.order_hash {
            Some(hash) => hashes.push(hash.clone()),
            None => unresolvable += 1,
        }
    }
    (hashes, unresolvable)
}

impl OfferJanitor<'_> {
    /// One reconciliation pass over every configured offer target.
    ///
    /// Gathers owned offers per scope, decides what to cancel, and fires
    /// one batched cancel per chain. A failure on one target or chain is
    /// logged and never stops the rest of the pass.
    pub async fn run(&self, targets: &[TrackedOfferTarget]) {
        let feed = OrderFeed::new(self.market, self.retry);
        let mut batches: HashMap<String, Vec<String>> = HashMap::new();

        for target in targets {
            let (query, filter) = OfferEngine::own_scope(target, self.owner);
            let owned = match feed.collect_offers(&query, &filter).await {
                Ok(owned) => owned,
                Err(err) => {
                    error!(
                        target = %target,
                        error = %err,
                        "Failed to gather owned offers, skipping target"
                    );
                    continue;
                }
            };

            let total = owned.len();
            let (hashes, unresolvable) = redundant_hashes(owned);
            if unresolvable > 0 {
                warn!(
                    target = %target,
                    count = unresolvable,
                    "Redundant offers without a resolvable order hash, skipping those"
                );
            }
            if hashes.is_empty() {
                continue;
            }
            info!(
                target = %target,
                live = total,
                cancelling = hashes.len(),
                "Redundant offers found, keeping the highest"
            );
            batches.entry(target.chain.clone()).or_default().extend(hashes);
        }

        for (chain, hashes) in batches {
            if self.dry_run {
                info!(
                    chain = %chain,
                    count = hashes.len(),
                    hashes = ?hashes,
                    "[DRY RUN] Would cancel redundant offers"
                );
                continue;
            }
            let result = with_retry(self.retry, "cancel_orders", || async {
                self.market
                    .cancel_orders(&chain, &hashes, self.owner)
                    .await
            })
            .await;
            match result {
                Ok(()) => info!(
                    chain = %chain,
                    count = hashes.len(),
                    "Redundant offers cancelled"
                ),
                Err(err) => error!(
                    chain = %chain,
                    count = hashes.len(),
                    error = %err,
                    "Batch cancellation failed"
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
