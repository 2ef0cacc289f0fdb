//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the marketplace API key) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.
//!
//! Validation is fatal: price-bound invariants, scope conflicts, and
//! missing RPC providers abort startup before any polling loop runs.
//! The validated target lists are immutable for the life of the process.

use std::collections::HashSet;

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::marketplace::sea::DEFAULT_API_BASE;
use crate::types::{
    opt_u256_from_str, u256_from_str, OfferScope, TraitCriterion, TrackedListingTarget,
    TrackedOfferTarget,
};

// ---------------------------------------------------------------------------
// Raw config shape
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub marketplace: MarketplaceConfig,
    pub maker: MakerConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub listings: Vec<ListingTargetConfig>,
    #[serde(default)]
    pub offers: Vec<OfferTargetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    /// The wallet whose listings/offers this bot manages.
    pub owner_address: Address,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MakerConfig {
    pub listing_interval_secs: u64,
    pub offer_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Log intended actions without submitting anything. Can also be
    /// forced on with the `MAKER_DRY_RUN` env var.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingTargetConfig {
    pub chain: String,
    pub collection_slug: String,
    pub token_address: Address,
    #[serde(deserialize_with = "u256_from_str")]
    pub token_id: U256,
    #[serde(deserialize_with = "u256_from_str")]
    pub default_price: U256,
    #[serde(deserialize_with = "u256_from_str")]
    pub min_price: U256,
    #[serde(default)]
    pub compare_across_collection: bool,
}

fn default_quantity() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct OfferTargetConfig {
    pub chain: String,
    pub collection_slug: String,
    pub token_address: Address,
    #[serde(default, deserialize_with = "opt_u256_from_str")]
    pub token_id: Option<U256>,
    #[serde(default, rename = "trait")]
    pub trait_criterion: Option<TraitCriterion>,
    #[serde(deserialize_with = "u256_from_str")]
    pub default_price: U256,
    #[serde(deserialize_with = "u256_from_str")]
    pub max_price: U256,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
    #[serde(default)]
    pub compare_across_collection: bool,
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Validate every invariant and build the immutable target lists.
    ///
    /// Any violation is an error here, which the caller treats as fatal
    /// before starting the loops.
    pub fn validated_targets(
        &self,
    ) -> Result<(Vec<TrackedListingTarget>, Vec<TrackedOfferTarget>)> {
        let chain_names: HashSet<&str> = self.chains.iter().map(|c| c.name.as_str()).collect();

        let listings = self
            .listings
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                raw.validate(&chain_names)
                    .with_context(|| format!("Invalid listing target at index {i}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let offers = self
            .offers
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                raw.validate(&chain_names)
                    .with_context(|| format!("Invalid offer target at index {i}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((listings, offers))
    }
}

impl ListingTargetConfig {
    fn validate(&self, chain_names: &HashSet<&str>) -> Result<TrackedListingTarget> {
        if !chain_names.contains(self.chain.as_str()) {
            bail!("chain '{}' has no configured RPC provider", self.chain);
        }
        if self.min_price.is_zero() || self.default_price.is_zero() {
            bail!("min_price and default_price must both be positive");
        }
        if self.min_price > self.default_price {
            bail!(
                "min_price {} exceeds default_price {}",
                self.min_price,
                self.default_price
            );
        }
        Ok(TrackedListingTarget {
            chain: self.chain.clone(),
            collection_slug: self.collection_slug.clone(),
            token_address: self.token_address,
            token_id: self.token_id,
            default_price: self.default_price,
            min_price: self.min_price,
            compare_across_collection: self.compare_across_collection,
        })
    }
}

impl OfferTargetConfig {
    fn validate(&self, chain_names: &HashSet<&str>) -> Result<TrackedOfferTarget> {
        if !chain_names.contains(self.chain.as_str()) {
            bail!("chain '{}' has no configured RPC provider", self.chain);
        }
        if self.default_price.is_zero() || self.max_price.is_zero() {
            bail!("default_price and max_price must both be positive");
        }
        if self.default_price > self.max_price {
            bail!(
                "default_price {} exceeds max_price {}",
                self.default_price,
                self.max_price
            );
        }
        if self.quantity == 0 {
            bail!("quantity must be at least 1");
        }
        let scope = OfferScope::infer(self.token_id, self.trait_criterion.clone())?;
        Ok(TrackedOfferTarget {
            chain: self.chain.clone(),
            collection_slug: self.collection_slug.clone(),
            token_address: self.token_address,
            scope,
            default_price: self.default_price,
            max_price: self.max_price,
            quantity: self.quantity,
            compare_across_collection: self.compare_across_collection,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
