//! CLI command implementations

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::context::AppContext;
use crate::monitor::Monitor;
use crate::pools::{PoolFilter, SortKey};
use crate::server;
use crate::types::Venue;

/// Run the HTTP API, optionally with the monitor worker in-process
pub async fn serve(config: &Config, with_worker: bool) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;

    if with_worker {
        let monitor_ctx = ctx.clone();
        tokio::spawn(async move {
            let monitor = Monitor::new(monitor_ctx);
            if let Err(e) = monitor.run().await {
                tracing::error!("monitor stopped: {}", e);
            }
        });
        info!("monitor worker running in-process");
    }

    server::serve(ctx).await?;
    Ok(())
}

/// Run the monitor/scheduler loop alone
pub async fn worker(config: &Config) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    Monitor::new(ctx).run().await?;
    Ok(())
}

/// Print top pools to stdout
pub async fn pools(
    config: &Config,
    venue: Option<String>,
    min_tvl: Option<f64>,
    max_risk: Option<u8>,
    sort: Option<String>,
    limit: usize,
) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let filter = PoolFilter {
        min_tvl_usd: min_tvl,
        max_risk,
        venue: venue.as_deref().map(Venue::parse).transpose()?,
        sort: sort
            .as_deref()
            .map(SortKey::parse)
            .transpose()?
            .unwrap_or_default(),
        limit,
    };

    let pools = ctx.pools.list_top(&filter).await?;
    println!(
        "{:<10} {:<14} {:>12} {:>12} {:>8} {:>6}",
        "VENUE", "PAIR", "TVL", "VOL(24H)", "APR%", "RISK"
    );
    for pool in &pools {
        println!(
            "{:<10} {:<14} {:>12.0} {:>12.0} {:>8.2} {:>6}",
            pool.venue.to_string(),
            format!("{}-{}", pool.token_a.symbol, pool.token_b.symbol),
            pool.tvl_usd,
            pool.volume_24h_usd,
            pool.apr,
            pool.risk_score,
        );
    }
    println!("{} pools", pools.len());
    Ok(())
}

/// Print a wallet's positions to stdout
pub async fn positions(config: &Config, wallet: &str) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let address = match ctx.wallets.load(wallet).await {
        Ok(profile) => profile.address,
        Err(_) => wallet.to_string(),
    };

    let positions = ctx.indexer.list(&address).await?;
    if positions.is_empty() {
        println!("no positions for {}", wallet);
        return Ok(());
    }
    for position in &positions {
        println!(
            "{} [{}] range [{}, {}] {} fees: {:.6}/{:.6}",
            position.id,
            position.venue,
            position.lower_index,
            position.upper_index,
            if position.in_range {
                "IN-RANGE"
            } else {
                "OUT-OF-RANGE"
            },
            position.fee_a_ui,
            position.fee_b_ui,
        );
    }
    Ok(())
}

/// Probe every external collaborator
pub async fn health(config: &Config) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;

    match ctx.rpc.get_latest_blockhash().await {
        Ok(_) => println!("rpc: ok"),
        Err(e) => warn!("rpc: FAILED ({})", e),
    }
    match ctx.store.ping().await {
        Ok(_) => println!(
            "store: ok ({})",
            if ctx.store.is_memory() { "memory" } else { "redis" }
        ),
        Err(e) => warn!("store: FAILED ({})", e),
    }
    if ctx.swap.healthy().await {
        println!("swap router: ok");
    } else {
        warn!("swap router: FAILED");
    }
    for venue in ctx.adapters.enabled() {
        let adapter = ctx.adapters.adapter_for(venue)?;
        match adapter.list_pools().await {
            Ok(pools) => println!("{}: ok ({} pools)", venue, pools.len()),
            Err(e) => warn!("{}: FAILED ({})", venue, e),
        }
    }
    Ok(())
}
