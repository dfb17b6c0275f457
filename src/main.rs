//! LP engine daemon and CLI
//!
//! # WARNING
//! - This engine moves real user capital. Test against devnet first.
//! - Bundle submission is MEV-sensitive; keep the relay endpoint private.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use lp_engine::cli::commands;
use lp_engine::config::Config;

/// Concentrated-liquidity LP execution engine
#[derive(Parser)]
#[command(name = "lp-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Also run the monitor worker in-process
        #[arg(long)]
        with_worker: bool,
    },

    /// Run the monitor/scheduler worker alone
    Worker,

    /// List top pools across venues
    Pools {
        /// Restrict to one venue (dlmm, whirlpool, clmm)
        #[arg(long)]
        venue: Option<String>,

        /// Minimum TVL in USD
        #[arg(long)]
        min_tvl: Option<f64>,

        /// Maximum risk score (1-10)
        #[arg(long)]
        max_risk: Option<u8>,

        /// Sort key: apr, tvl, volume, risk_adjusted_yield
        #[arg(long)]
        sort: Option<String>,

        /// Number of pools to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List a wallet's positions
    Positions {
        /// Wallet id or raw address
        wallet: String,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check system health (RPC, store, swap router, venues)
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lp_engine=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { with_worker } => {
            info!("starting LP engine API");
            commands::serve(&config, with_worker).await?;
        }
        Commands::Worker => {
            info!("starting LP engine worker");
            commands::worker(&config).await?;
        }
        Commands::Pools {
            venue,
            min_tvl,
            max_risk,
            sort,
            limit,
        } => {
            commands::pools(&config, venue, min_tvl, max_risk, sort, limit).await?;
        }
        Commands::Positions { wallet } => {
            commands::positions(&config, &wallet).await?;
        }
        Commands::Config => {
            println!("{}", config.masked_display());
        }
        Commands::Health => {
            commands::health(&config).await?;
        }
    }

    Ok(())
}
