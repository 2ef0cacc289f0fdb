//! Marketplace HTTP client.
//!
//! Thin wrapper over the marketplace's REST API: builds order queries,
//! maps non-success responses into the typed error taxonomy, and converts
//! the wire shape into [`CompetingOrder`]s. No pricing logic lives here.

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::marketplace::{
    CollectionOfferRequest, ListingRequest, Marketplace, MarketplaceError, OrderHandle,
    OrderQuery, TokenOfferRequest,
};
use crate::orders::{offer_side_units, redemption_quantity, ProtocolOrder};
use crate::types::{u256_from_str, CompetingOrder, OrderPage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_BASE: &str = "https://api.opensea.io";
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

fn default_currency() -> String {
    "ETH".to_string()
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
struct ApiProtocolData {
    #[serde(default)]
    parameters: ProtocolOrder,
}

#[derive(Debug, Deserialize)]
struct ApiOrder {
    #[serde(default)]
    order_hash: Option<String>,
    maker: ApiAccount,
    /// Total price in the smallest currency unit, as a decimal string.
    #[serde(default, deserialize_with = "u256_from_str")]
    current_price: U256,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    listing_time: i64,
    #[serde(default)]
    expiration_time: i64,
    #[serde(default)]
    protocol_data: ApiProtocolData,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<ApiOrder>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    order_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelBody<'a> {
    order_hashes: &'a [String],
    offerer: Address,
}

/// Which side of the book a query reads. Determines the endpoint, the
/// server-side sort direction, and how per-order quantity is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookSide {
    Listings,
    Offers,
}

impl BookSide {
    fn path(&self) -> &'static str {
        match self {
            BookSide::Listings => "listings",
            BookSide::Offers => "offers",
        }
    }

    /// Best-first for the server-sorted fast path: cheapest listing,
    /// highest offer.
    fn sort_direction(&self) -> &'static str {
        match self {
            BookSide::Listings => "asc",
            BookSide::Offers => "desc",
        }
    }
}

/// Convert a wire order into the uniform comparison shape.
///
/// Listings carry their item count on the offer side; buy-side orders
/// carry it in the consideration (criteria item for collection/trait
/// offers, specific NFT items otherwise).
fn convert_order(api: ApiOrder, side: BookSide) -> CompetingOrder {
    let protocol = api.protocol_data.parameters;
    let quantity = match side {
        BookSide::Listings => offer_side_units(&protocol),
        BookSide::Offers => redemption_quantity(&protocol),
    };
    CompetingOrder {
        order_hash: api.order_hash,
        maker: api.maker.address,
        price_total: api.current_price,
        price_currency: api.currency,
        quantity,
        end_time: api.expiration_time,
        start_time: api.listing_time,
        protocol,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Seaport-protocol marketplace client.
pub struct SeaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SeaClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build marketplace HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn fetch_orders(
        &self,
        side: BookSide,
        query: &OrderQuery,
        cursor: Option<String>,
    ) -> Result<OrderPage> {
        let url = format!(
            "{}/api/v2/orders/{}/seaport/{}",
            self.base_url,
            query.chain,
            side.path()
        );

        let mut params: Vec<(&str, String)> = vec![
            ("asset_contract_address", query.token_address.to_string()),
            ("limit", query.page_size.to_string()),
        ];
        if let Some(token_id) = query.token_id {
            params.push(("token_ids", token_id.to_string()));
        }
        if let Some(criterion) = &query.criterion {
            params.push(("trait_type", criterion.trait_type.clone()));
            params.push(("trait_value", criterion.value.clone()));
        }
        if let Some(maker) = query.maker {
            params.push(("maker", maker.to_string()));
        }
        if query.sort_by_price {
            params.push(("order_by", "eth_price".to_string()));
            params.push(("order_direction", side.sort_direction().to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }

        debug!(side = side.path(), collection = %query.collection_slug, "Fetching order page");

        let resp = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(MarketplaceError::Http)?;

        let resp = Self::check_status(resp).await?;
        let body: OrdersResponse = resp
            .json()
            .await
            .context("Failed to parse orders response")?;

        Ok(OrderPage {
            orders: body
                .orders
                .into_iter()
                .map(|o| convert_order(o, side))
                .collect(),
            next_cursor: body.next,
        })
    }

    async fn post_order(&self, url: String, body: serde_json::Value, price: U256) -> Result<OrderHandle> {
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(MarketplaceError::Http)?;

        let resp = Self::check_status(resp).await?;
        let created: CreateResponse = resp
            .json()
            .await
            .context("Failed to parse order creation response")?;

        Ok(OrderHandle {
            order_hash: created.order_hash,
            price,
        })
    }

    /// Map a non-success response into the typed taxonomy.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = resp.text().await.unwrap_or_default();
        Err(MarketplaceError::classify(status.as_u16(), retry_after, &message).into())
    }
}

#[async_trait]
impl Marketplace for SeaClient {
    async fn listings_page(
        &self,
        query: &OrderQuery,
        cursor: Option<String>,
    ) -> Result<OrderPage> {
        self.fetch_orders(BookSide::Listings, query, cursor).await
    }

    async fn offers_page(&self, query: &OrderQuery, cursor: Option<String>) -> Result<OrderPage> {
        self.fetch_orders(BookSide::Offers, query, cursor).await
    }

    async fn create_listing(&self, request: &ListingRequest) -> Result<OrderHandle> {
        let url = format!("{}/api/v2/listings/{}", self.base_url, request.chain);
        let body = serde_json::json!({
            "asset_contract_address": request.token_address,
            "token_id": request.token_id.to_string(),
            "price_wei": request.price.to_string(),
            "expiration_time": request.expiration.timestamp(),
            "offerer": request.account,
        });
        self.post_order(url, body, request.price).await
    }

    async fn create_token_offer(&self, request: &TokenOfferRequest) -> Result<OrderHandle> {
        let url = format!("{}/api/v2/offers/{}", self.base_url, request.chain);
        let body = serde_json::json!({
            "asset_contract_address": request.token_address,
            "token_id": request.token_id.to_string(),
            "price_wei": request.price.to_string(),
            "payment_token": request.payment_token,
            "expiration_time": request.expiration.timestamp(),
            "offerer": request.account,
        });
        self.post_order(url, body, request.price).await
    }

    async fn create_collection_offer(
        &self,
        request: &CollectionOfferRequest,
    ) -> Result<OrderHandle> {
        let url = format!(
            "{}/api/v2/offers/{}/collection/{}",
            self.base_url, request.chain, request.collection_slug
        );
        let mut body = serde_json::json!({
            "price_wei": request.price_total.to_string(),
            "quantity": request.quantity,
            "payment_token": request.payment_token,
            "expiration_time": request.expiration.timestamp(),
            "offerer": request.account,
        });
        if let Some(criterion) = &request.criterion {
            body["trait_type"] = serde_json::json!(criterion.trait_type);
            body["trait_value"] = serde_json::json!(criterion.value);
        }
        self.post_order(url, body, request.price_total).await
    }

    async fn cancel_orders(
        &self,
        chain: &str,
        order_hashes: &[String],
        account: Address,
    ) -> Result<()> {
        let url = format!("{}/api/v2/orders/{}/cancel", self.base_url, chain);
        let body = CancelBody {
            order_hashes,
            offerer: account,
        };
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(MarketplaceError::Http)?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
