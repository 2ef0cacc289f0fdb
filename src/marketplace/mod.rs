//! Marketplace integration.
//!
//! Defines the `Marketplace` capability trait — order queries, order
//! submission, and batch cancellation — plus the typed error taxonomy the
//! retry layer and the engines classify on. The concrete HTTP client
//! lives in `sea.rs`; tests substitute in-memory doubles.

pub mod sea;

use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{OrderPage, TraitCriterion};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed failures from the marketplace API.
///
/// Everything the engines need to branch on — rate limiting, the
/// sort-unsupported fallback, and precision rejections — is a variant
/// here; anything else stays in `Api`/`Http`.
#[derive(Debug, Error)]
pub enum MarketplaceError {
    /// 429 with a server-advised wait.
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// The server cannot sort this scope by price (multi-token scopes).
    #[error("price sorting unsupported for this scope: {0}")]
    SortUnsupported(String),

    /// The submitted price carries more decimal places than allowed.
    #[error("price precision rejected: {0}")]
    PrecisionRejected(String),

    /// Any other API-level rejection.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MarketplaceError {
    /// Whether the generic retry wrapper should retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketplaceError::RateLimited { .. } => true,
            MarketplaceError::Http(_) => true,
            MarketplaceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-advised wait, for the rate-limit retry wrapper.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            MarketplaceError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Classify a non-success API response.
    ///
    /// Rate limits are recognized by status; the sort-unsupported and
    /// precision rejections only by message content — the server reports
    /// both as plain 400s.
    pub fn classify(status: u16, retry_after: Option<u64>, message: &str) -> Self {
        if status == 429 {
            return MarketplaceError::RateLimited {
                retry_after: retry_after.unwrap_or(1),
            };
        }
        let lowered = message.to_lowercase();
        if lowered.contains("cannot be sorted") || lowered.contains("sort is not supported") {
            return MarketplaceError::SortUnsupported(message.to_string());
        }
        if lowered.contains("decimal") {
            return MarketplaceError::PrecisionRejected(message.to_string());
        }
        MarketplaceError::Api {
            status,
            message: message.to_string(),
        }
    }
}

/// Whether an error is the sort-unsupported rejection (query fallback).
pub fn is_sort_unsupported(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MarketplaceError>(),
        Some(MarketplaceError::SortUnsupported(_))
    )
}

/// Whether an error is a precision rejection (3-decimal fallback).
pub fn is_precision_rejected(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MarketplaceError>(),
        Some(MarketplaceError::PrecisionRejected(_))
    )
}

// ---------------------------------------------------------------------------
// Queries and requests
// ---------------------------------------------------------------------------

/// Scope selector for an order query.
#[derive(Debug, Clone)]
pub struct OrderQuery {
    pub chain: String,
    pub collection_slug: String,
    pub token_address: Address,
    /// Restrict to one token. Server-side price sorting is only
    /// available when this is set.
    pub token_id: Option<U256>,
    /// Restrict to one trait (criteria-scoped offers).
    pub criterion: Option<TraitCriterion>,
    /// Restrict to orders made by one account.
    pub maker: Option<Address>,
    /// Request server-side price ordering (best first).
    pub sort_by_price: bool,
    pub page_size: u32,
}

impl OrderQuery {
    /// A collection-wide query with no further restrictions.
    pub fn collection(chain: &str, slug: &str, token_address: Address) -> Self {
        Self {
            chain: chain.to_string(),
            collection_slug: slug.to_string(),
            token_address,
            token_id: None,
            criterion: None,
            maker: None,
            sort_by_price: false,
            page_size: 50,
        }
    }

    pub fn with_token(mut self, token_id: U256) -> Self {
        self.token_id = Some(token_id);
        self
    }

    pub fn with_criterion(mut self, criterion: TraitCriterion) -> Self {
        self.criterion = Some(criterion);
        self
    }

    pub fn with_maker(mut self, maker: Address) -> Self {
        self.maker = Some(maker);
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sort_by_price = true;
        self
    }

    pub fn unsorted(mut self) -> Self {
        self.sort_by_price = false;
        self
    }
}

/// A sell-side submission.
#[derive(Debug, Clone)]
pub struct ListingRequest {
    pub chain: String,
    pub token_address: Address,
    pub token_id: U256,
    /// Wei.
    pub price: U256,
    pub expiration: DateTime<Utc>,
    pub account: Address,
}

/// A buy-side submission for one specific token.
#[derive(Debug, Clone)]
pub struct TokenOfferRequest {
    pub chain: String,
    pub token_address: Address,
    pub token_id: U256,
    /// Wei, total (single token — per-item and total coincide).
    pub price: U256,
    /// Settlement currency contract (WETH-equivalent for the chain).
    pub payment_token: Address,
    pub expiration: DateTime<Utc>,
    pub account: Address,
}

/// A buy-side submission for a collection or trait scope.
#[derive(Debug, Clone)]
pub struct CollectionOfferRequest {
    pub chain: String,
    pub collection_slug: String,
    /// Present for trait-scoped offers.
    pub criterion: Option<TraitCriterion>,
    /// Wei, total across `quantity` items.
    pub price_total: U256,
    pub quantity: u64,
    pub payment_token: Address,
    pub expiration: DateTime<Utc>,
    pub account: Address,
}

/// What a successful submission returns.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub order_hash: Option<String>,
    /// The price the order was actually created at (may differ from the
    /// requested price after a precision fallback).
    pub price: U256,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Abstraction over the marketplace's query and submission APIs.
///
/// The engines depend only on this trait; the HTTP client implements it
/// and tests substitute deterministic doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// One page of sell-side orders matching the query.
    async fn listings_page(&self, query: &OrderQuery, cursor: Option<String>)
        -> Result<OrderPage>;

    /// One page of buy-side orders matching the query.
    async fn offers_page(&self, query: &OrderQuery, cursor: Option<String>) -> Result<OrderPage>;

    async fn create_listing(&self, request: &ListingRequest) -> Result<OrderHandle>;

    async fn create_token_offer(&self, request: &TokenOfferRequest) -> Result<OrderHandle>;

    /// Creates a criteria-scoped offer; covers both collection-wide and
    /// trait-scoped offers depending on `request.criterion`.
    async fn create_collection_offer(
        &self,
        request: &CollectionOfferRequest,
    ) -> Result<OrderHandle>;

    /// Cancel a batch of orders on one chain in a single call.
    async fn cancel_orders(
        &self,
        chain: &str,
        order_hashes: &[String],
        account: Address,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
