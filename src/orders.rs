//! Protocol-level order payloads and price/quantity extraction.
//!
//! Marketplace orders arrive as Seaport-shaped payloads: an `offer` side
//! (what the maker gives) and a `consideration` side (what the maker
//! receives). Listings put the NFT on the offer side; offers put the
//! payment token there and the NFT — or a criteria placeholder for
//! collection/trait offers — in the consideration.
//!
//! All amounts are `U256`. On-chain amounts exceed 64-bit (and a double's
//! 53-bit mantissa), so intermediate floating point is never used.

use alloy_primitives::U256;
use serde::Deserialize;

use crate::types::u256_from_str;

// ---------------------------------------------------------------------------
// Item model
// ---------------------------------------------------------------------------

/// Seaport item types.
pub const ITEM_NATIVE: u8 = 0;
pub const ITEM_ERC20: u8 = 1;
pub const ITEM_ERC721: u8 = 2;
pub const ITEM_ERC1155: u8 = 3;
pub const ITEM_ERC721_WITH_CRITERIA: u8 = 4;
pub const ITEM_ERC1155_WITH_CRITERIA: u8 = 5;

/// One item on either side of a protocol order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "itemType", default)]
    pub item_type: u8,
    /// Token id for specific items, criteria root for criteria items.
    #[serde(
        rename = "identifierOrCriteria",
        deserialize_with = "u256_from_str",
        default
    )]
    pub identifier: U256,
    #[serde(rename = "startAmount", deserialize_with = "u256_from_str", default)]
    pub start_amount: U256,
    #[serde(rename = "endAmount", deserialize_with = "u256_from_str", default)]
    pub end_amount: U256,
}

impl OrderItem {
    /// Criteria items stand for "any token matching the criteria" —
    /// the marker of a collection- or trait-scoped order.
    pub fn is_criteria(&self) -> bool {
        matches!(
            self.item_type,
            ITEM_ERC721_WITH_CRITERIA | ITEM_ERC1155_WITH_CRITERIA
        )
    }

    /// Whether this item is an NFT of any kind.
    pub fn is_nft(&self) -> bool {
        matches!(
            self.item_type,
            ITEM_ERC721 | ITEM_ERC1155 | ITEM_ERC721_WITH_CRITERIA | ITEM_ERC1155_WITH_CRITERIA
        )
    }

    /// The item's unit count: end amount, falling back to start amount
    /// when the end amount is absent (serialized as zero).
    pub fn units(&self) -> U256 {
        if self.end_amount.is_zero() {
            self.start_amount
        } else {
            self.end_amount
        }
    }
}

/// The raw two-sided payload of a marketplace order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolOrder {
    #[serde(default)]
    pub offer: Vec<OrderItem>,
    #[serde(default)]
    pub consideration: Vec<OrderItem>,
}

impl ProtocolOrder {
    /// Whether either side carries a specific (non-criteria) NFT item
    /// with the given token id.
    pub fn includes_token(&self, token_id: U256) -> bool {
        self.offer
            .iter()
            .chain(self.consideration.iter())
            .any(|item| item.is_nft() && !item.is_criteria() && item.identifier == token_id)
    }
}

// ---------------------------------------------------------------------------
// Quantity extraction
// ---------------------------------------------------------------------------

/// Units on the offer side of a listing: the sum of end amounts of the
/// items the maker gives up. Fee line items are bundled into the total
/// price on the consideration side, so they never inflate this count.
/// Defaults to 1 when the offer side is empty.
pub fn offer_side_units(protocol: &ProtocolOrder) -> U256 {
    let total: U256 = protocol
        .offer
        .iter()
        .fold(U256::ZERO, |acc, item| acc.saturating_add(item.units()));
    if total.is_zero() {
        U256::from(1u64)
    } else {
        total
    }
}

/// How many items a buy-side order can redeem.
///
/// A criteria item in the consideration (collection/trait offer) carries
/// the redemption count directly; otherwise the count is the sum of
/// specific NFT consideration items. Defaults to 1 when neither is found.
pub fn redemption_quantity(protocol: &ProtocolOrder) -> U256 {
    if let Some(criteria) = protocol.consideration.iter().find(|item| item.is_criteria()) {
        let units = criteria.units();
        return if units.is_zero() { U256::from(1u64) } else { units };
    }

    let total: U256 = protocol
        .consideration
        .iter()
        .filter(|item| item.is_nft())
        .fold(U256::ZERO, |acc, item| acc.saturating_add(item.units()));
    if total.is_zero() {
        U256::from(1u64)
    } else {
        total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
