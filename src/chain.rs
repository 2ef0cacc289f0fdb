//! Chain registry and settlement-token resolution.
//!
//! Built once at startup: each configured chain's RPC endpoint is asked
//! for its chain id, and the resulting immutable registry is passed by
//! reference to every component that needs it. No ambient globals.

use std::collections::HashMap;

use alloy_primitives::{address, Address};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Wrapped-native settlement tokens
// ---------------------------------------------------------------------------

const MAINNET_WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const POLYGON_WETH: Address = address!("0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619");
const ARBITRUM_WETH: Address = address!("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1");
/// Optimism and Base share the canonical predeploy address.
const OP_STACK_WETH: Address = address!("0x4200000000000000000000000000000000000006");

/// The WETH-equivalent contract offers settle in on a given chain.
///
/// Unlisted chains fall back to the mainnet address. That fallback is
/// wrong for chains whose wrapped-native contract differs; the lookup
/// logs when it is taken so misconfigured chains show up in the audit
/// trail instead of silently mispricing.
pub fn wrapped_native_token(chain_id: u64) -> Address {
    match chain_id {
        1 => MAINNET_WETH,
        10 | 8453 => OP_STACK_WETH,
        137 => POLYGON_WETH,
        42161 => ARBITRUM_WETH,
        other => {
            debug!(
                chain_id = other,
                "No wrapped-native token entry for chain, falling back to mainnet WETH"
            );
            MAINNET_WETH
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A connected chain: resolved id plus the endpoint it came from.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
}

impl ChainHandle {
    /// The settlement token for offers on this chain.
    pub fn payment_token(&self) -> Address {
        wrapped_native_token(self.chain_id)
    }
}

/// Immutable map of chain name to connected handle.
pub struct ChainRegistry {
    chains: HashMap<String, ChainHandle>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
}

impl ChainRegistry {
    /// Resolve every configured chain's id via `eth_chainId` and build
    /// the registry. Any unreachable endpoint is fatal: the bot must not
    /// start without all configured chains resolvable.
    pub async fn connect(endpoints: &[(String, String)]) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build RPC HTTP client")?;

        let mut chains = HashMap::new();
        for (name, rpc_url) in endpoints {
            let chain_id = Self::resolve_chain_id(&http, rpc_url)
                .await
                .with_context(|| format!("Failed to resolve chain id for '{name}'"))?;
            info!(chain = %name, chain_id, "Chain connected");
            chains.insert(
                name.clone(),
                ChainHandle {
                    name: name.clone(),
                    chain_id,
                    rpc_url: rpc_url.clone(),
                },
            );
        }
        Ok(Self { chains })
    }

    /// Build a registry from pre-resolved handles (tests, fixtures).
    pub fn from_handles(handles: Vec<ChainHandle>) -> Self {
        Self {
            chains: handles.into_iter().map(|h| (h.name.clone(), h)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ChainHandle> {
        self.chains.get(name)
    }

    /// Lookup that treats an unknown chain as a configuration error.
    pub fn require(&self, name: &str) -> Result<&ChainHandle> {
        self.chains
            .get(name)
            .with_context(|| format!("Chain '{name}' has no configured RPC provider"))
    }

    async fn resolve_chain_id(http: &Client, rpc_url: &str) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_chainId",
            "params": [],
        });
        let resp: RpcResponse = http
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .context("eth_chainId request failed")?
            .json()
            .await
            .context("Failed to parse eth_chainId response")?;

        let hex = resp
            .result
            .context("eth_chainId response carried no result")?;
        let trimmed = hex.trim_start_matches("0x");
        u64::from_str_radix(trimmed, 16)
            .with_context(|| format!("Invalid chain id in RPC response: {hex}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
