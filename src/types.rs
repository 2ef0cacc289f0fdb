//! Shared types for the maker bot.
//!
//! These types form the data model used across all modules: the tracked
//! targets loaded from configuration, the competing orders read back from
//! the marketplace every cycle, and the page/ordering vocabulary of the
//! best-price aggregation. All prices are wei-denominated `U256` values;
//! floating point never touches a price.

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::orders::ProtocolOrder;

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Deserialize a `U256` from a decimal (or 0x-prefixed hex) string.
///
/// Wei amounts routinely exceed what a JSON number can carry, so every
/// price field on the wire and in the config file is a string.
pub fn u256_from_str<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    U256::from_str(s.trim()).map_err(serde::de::Error::custom)
}

/// Optional variant of [`u256_from_str`].
pub fn opt_u256_from_str<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) => U256::from_str(s.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tracked targets
// ---------------------------------------------------------------------------

/// A token the bot keeps listed at the most competitive price within
/// its owner-defined bounds. Immutable after configuration load.
#[derive(Debug, Clone)]
pub struct TrackedListingTarget {
    pub chain: String,
    pub collection_slug: String,
    pub token_address: Address,
    pub token_id: U256,
    /// Price to list at when no competition exists (wei).
    pub default_price: U256,
    /// Hard floor; the bot never lists below this (wei).
    pub min_price: U256,
    /// Compare against every listing in the collection rather than only
    /// listings for this specific token.
    pub compare_across_collection: bool,
}

impl fmt::Display for TrackedListingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.collection_slug, self.token_id, self.chain)
    }
}

/// A trait criterion for trait-scoped offers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraitCriterion {
    #[serde(rename = "type")]
    pub trait_type: String,
    pub value: String,
}

impl fmt::Display for TraitCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.trait_type, self.value)
    }
}

/// What a tracked offer bids on.
///
/// Built once at configuration load from the optional `token_id` /
/// `trait` fields; the rest of the code matches on this and never
/// re-inspects optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferScope {
    /// A single token.
    Token(U256),
    /// Every token in the collection.
    Collection,
    /// Every token matching one trait.
    Trait(TraitCriterion),
}

impl OfferScope {
    /// Infer the scope from the two optional config fields.
    ///
    /// `token_id` and `trait` are mutually exclusive; absence of both
    /// means a collection-wide offer.
    pub fn infer(
        token_id: Option<U256>,
        criterion: Option<TraitCriterion>,
    ) -> anyhow::Result<Self> {
        match (token_id, criterion) {
            (Some(_), Some(_)) => anyhow::bail!(
                "offer target sets both token_id and trait; at most one is allowed"
            ),
            (Some(id), None) => Ok(OfferScope::Token(id)),
            (None, Some(c)) => Ok(OfferScope::Trait(c)),
            (None, None) => Ok(OfferScope::Collection),
        }
    }

    /// The specific token id, when this scope targets one token.
    pub fn token_id(&self) -> Option<U256> {
        match self {
            OfferScope::Token(id) => Some(*id),
            _ => None,
        }
    }

}

impl fmt::Display for OfferScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferScope::Token(id) => write!(f, "token {id}"),
            OfferScope::Collection => write!(f, "collection"),
            OfferScope::Trait(c) => write!(f, "trait {c}"),
        }
    }
}

/// A collection, token, or trait the bot keeps the best offer on,
/// within its owner-defined bounds. Immutable after configuration load.
#[derive(Debug, Clone)]
pub struct TrackedOfferTarget {
    pub chain: String,
    pub collection_slug: String,
    pub token_address: Address,
    pub scope: OfferScope,
    /// Price to offer when no competition exists (wei, per item).
    pub default_price: U256,
    /// Hard ceiling; the bot never offers above this (wei, per item).
    pub max_price: U256,
    /// Items per offer; meaningful for collection/trait scope only.
    pub quantity: u64,
    /// Compare against collection-wide offers rather than only offers
    /// for this specific token.
    pub compare_across_collection: bool,
}

impl fmt::Display for TrackedOfferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.collection_slug, self.scope, self.chain)
    }
}

// ---------------------------------------------------------------------------
// Competing orders
// ---------------------------------------------------------------------------

/// A listing or offer read back from the marketplace, in a uniform shape.
///
/// Constructed fresh every polling cycle; never persisted. `quantity` is
/// derived from the protocol payload at parse time (see `orders.rs`), so
/// `price_per_item` is a plain floor division everywhere.
#[derive(Debug, Clone)]
pub struct CompetingOrder {
    /// Some orders come back without a resolvable hash; those can be
    /// compared against but not cancelled.
    pub order_hash: Option<String>,
    pub maker: Address,
    /// Total order price in the smallest currency unit.
    pub price_total: U256,
    /// Currency symbol, e.g. "ETH" or "WETH".
    pub price_currency: String,
    /// Number of items the order covers; at least 1.
    pub quantity: U256,
    /// Unix seconds.
    pub end_time: i64,
    pub start_time: i64,
    pub protocol: ProtocolOrder,
}

impl CompetingOrder {
    /// The universal comparison key: total price floor-divided by quantity.
    pub fn price_per_item(&self) -> U256 {
        let qty = if self.quantity.is_zero() {
            U256::from(1u64)
        } else {
            self.quantity
        };
        self.price_total / qty
    }
}

/// One page of competing orders from the query capability.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<CompetingOrder>,
    /// Opaque continuation token; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Which extreme of price-per-item wins an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceOrdering {
    /// Cheapest wins (listing side).
    Ascending,
    /// Highest wins (offer side).
    Descending,
}

impl PriceOrdering {
    /// Whether `candidate` strictly beats `incumbent` under this ordering.
    /// Ties never replace, so the first-seen order wins.
    pub fn prefers(&self, candidate: U256, incumbent: U256) -> bool {
        match self {
            PriceOrdering::Ascending => candidate < incumbent,
            PriceOrdering::Descending => candidate > incumbent,
        }
    }
}

/// Whether a currency symbol is an ETH-equivalent the engines can compare
/// without conversion.
pub fn is_eth_equivalent(symbol: &str) -> bool {
    symbol.eq_ignore_ascii_case("ETH") || symbol.eq_ignore_ascii_case("WETH")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
