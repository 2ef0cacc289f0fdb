//! floormaker — automated maker bot for NFT marketplace listings and offers.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the chain registry, and runs three independent polling loops
//! (listings, offers, stale-offer cleanup) until shut down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use floormaker::chain::ChainRegistry;
use floormaker::config::AppConfig;
use floormaker::engine::Maker;
use floormaker::marketplace::sea::SeaClient;
use floormaker::marketplace::Marketplace;
use floormaker::retry::RetryPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    // Validate everything before touching the network: bad price bounds,
    // conflicting scopes, or a missing RPC provider abort right here.
    let (listing_targets, offer_targets) = cfg.validated_targets()?;

    let dry_run = cfg.maker.dry_run || std::env::var("MAKER_DRY_RUN").is_ok();
    if dry_run {
        warn!("Dry-run mode: decisions will be logged but nothing submitted");
    }

    info!(
        listings = listing_targets.len(),
        offers = offer_targets.len(),
        chains = cfg.chains.len(),
        owner = %cfg.marketplace.owner_address,
        dry_run,
        "floormaker starting up"
    );

    // -- Connect collaborators -------------------------------------------

    let endpoints: Vec<(String, String)> = cfg
        .chains
        .iter()
        .map(|c| (c.name.clone(), c.rpc_url.clone()))
        .collect();
    let chains = Arc::new(ChainRegistry::connect(&endpoints).await?);

    let api_key = AppConfig::resolve_env(&cfg.marketplace.api_key_env)?;
    let market: Arc<dyn Marketplace> =
        Arc::new(SeaClient::new(&cfg.marketplace.api_base, &api_key)?);

    let maker = Maker::new(
        market,
        chains,
        RetryPolicy::default(),
        cfg.marketplace.owner_address,
        dry_run,
    );

    // -- Polling loops ----------------------------------------------------
    //
    // Three independent loops, spawned together and never joined. Each
    // cycle catches its own per-target errors, so a loop only ends when
    // the process does.

    {
        let maker = maker.clone();
        let targets = listing_targets;
        let interval = Duration::from_secs(cfg.maker.listing_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                info!(targets = targets.len(), "Listing cycle starting");
                maker.listing_cycle(&targets).await;
            }
        });
    }

    {
        let maker = maker.clone();
        let targets = offer_targets.clone();
        let interval = Duration::from_secs(cfg.maker.offer_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                info!(targets = targets.len(), "Offer cycle starting");
                maker.offer_cycle(&targets).await;
            }
        });
    }

    {
        let maker = maker.clone();
        let targets = offer_targets;
        let interval = Duration::from_secs(cfg.maker.cleanup_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                info!(targets = targets.len(), "Cleanup cycle starting");
                maker.cleanup_cycle(&targets).await;
            }
        });
    }

    info!("Polling loops running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("floormaker=info"));

    let json_logging = std::env::var("MAKER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
