//! Venue adapters
//!
//! One adapter per concentrated-liquidity venue, all implementing the
//! same operation set. The composer selects an implementation by venue
//! tag; nothing outside this module knows venue-specific layouts.

pub mod clmm;
pub mod dlmm;
pub mod math;
pub mod whirlpool;

use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;

use crate::config::VenuesConfig;
use crate::error::{Error, Result};
use crate::types::{Distribution, Granularity, Pool, Position, RangeShape, Venue};
use math::LiquidityQuote;

pub use clmm::ClmmAdapter;
pub use dlmm::DlmmAdapter;
pub use whirlpool::WhirlpoolAdapter;

/// Result of building an open-position instruction set
pub struct OpenBuild {
    /// Ordered unsigned instructions (array init first, then open+add)
    pub instructions: Vec<Instruction>,
    /// Fresh keypairs the instructions require (position account or
    /// position-NFT mint); handed to the custody oracle for co-signing
    pub aux_signers: Vec<Keypair>,
    /// Stable identifier of the position being created
    pub position_id: String,
}

/// Common operation set over a venue
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch and normalize a single pool
    async fn describe_pool(&self, address: &str) -> Result<Pool>;

    /// All concentrated pools from the venue's public index
    async fn list_pools(&self) -> Result<Vec<Pool>>;

    /// Unsigned instructions opening a position over `range` and
    /// depositing `amount_a`/`amount_b`
    async fn build_open(
        &self,
        pool: &Pool,
        range: (i32, i32),
        amount_a: u64,
        amount_b: u64,
        owner: &Pubkey,
        distribution: Distribution,
        slippage_bps: u16,
    ) -> Result<OpenBuild>;

    /// Remove `bps_to_remove` of the position's liquidity; removing all
    /// 10 000 bps with `close_if_full` also closes the position account
    async fn build_decrease(
        &self,
        position: &Position,
        bps_to_remove: u16,
        close_if_full: bool,
    ) -> Result<Vec<Instruction>>;

    /// Collect accrued fees; venues that need it emit an update step
    /// before the collect
    async fn build_collect_fees(&self, position: &Position) -> Result<Vec<Instruction>>;

    /// Enumerate a wallet's open positions on this venue
    async fn enumerate_positions(&self, wallet: &Pubkey) -> Result<Vec<Position>>;

    /// Range for a shape, snapped to the pool's grid
    fn compute_range(&self, pool: &Pool, shape: &RangeShape) -> Result<(i32, i32)> {
        compute_range(pool, shape)
    }

    /// Liquidity and amount expectations for a prospective deposit
    fn quote_liquidity(
        &self,
        pool: &Pool,
        range: (i32, i32),
        amount_a: u64,
        amount_b: u64,
        slippage_bps: u16,
    ) -> Result<LiquidityQuote> {
        quote_liquidity(pool, range, amount_a, amount_b, slippage_bps)
    }
}

/// Shape-to-range resolution shared by every adapter
pub fn compute_range(pool: &Pool, shape: &RangeShape) -> Result<(i32, i32)> {
    let units = match shape {
        RangeShape::Concentrated => math::CONCENTRATED_UNITS,
        RangeShape::Wide => math::WIDE_UNITS,
        RangeShape::Custom { lower, upper } => {
            math::validate_custom_range(*lower, *upper, pool.granularity)?;
            return Ok((*lower, *upper));
        }
    };
    let range = match pool.granularity {
        Granularity::BinStep(step) => math::snap_bin_range(pool.active_index, step, units),
        Granularity::TickSpacing(spacing) => {
            math::snap_tick_range(pool.active_index, spacing, units)
        }
    };
    Ok(range)
}

/// Quote dispatch on the pool's granularity
pub fn quote_liquidity(
    pool: &Pool,
    range: (i32, i32),
    amount_a: u64,
    amount_b: u64,
    slippage_bps: u16,
) -> Result<LiquidityQuote> {
    match pool.granularity {
        Granularity::BinStep(step) => math::quote_bin_liquidity(
            pool.active_index,
            range.0,
            range.1,
            step,
            amount_a,
            amount_b,
            slippage_bps,
        ),
        Granularity::TickSpacing(_) => math::quote_tick_liquidity(
            pool.active_index,
            range.0,
            range.1,
            amount_a,
            amount_b,
            slippage_bps,
        ),
    }
}

/// The three adapters behind one registry, constructed at startup
pub struct AdapterSet {
    dlmm: Option<DlmmAdapter>,
    whirlpool: Option<WhirlpoolAdapter>,
    clmm: Option<ClmmAdapter>,
}

impl AdapterSet {
    pub fn new(
        config: &VenuesConfig,
        rpc: std::sync::Arc<solana_client::nonblocking::rpc_client::RpcClient>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            dlmm: config
                .dlmm_enabled
                .then(|| DlmmAdapter::new(http.clone(), config.dlmm_api.clone(), rpc.clone())),
            whirlpool: config.whirlpool_enabled.then(|| {
                WhirlpoolAdapter::new(http.clone(), config.whirlpool_api.clone(), rpc.clone())
            }),
            clmm: config
                .clmm_enabled
                .then(|| ClmmAdapter::new(http.clone(), config.clmm_api.clone(), rpc.clone())),
        })
    }

    pub fn adapter_for(&self, venue: Venue) -> Result<&dyn VenueAdapter> {
        let adapter: Option<&dyn VenueAdapter> = match venue {
            Venue::Dlmm => self.dlmm.as_ref().map(|a| a as &dyn VenueAdapter),
            Venue::Whirlpool => self.whirlpool.as_ref().map(|a| a as &dyn VenueAdapter),
            Venue::Clmm => self.clmm.as_ref().map(|a| a as &dyn VenueAdapter),
        };
        adapter.ok_or_else(|| Error::Validation(format!("venue {} is disabled", venue)))
    }

    pub fn enabled(&self) -> Vec<Venue> {
        let mut venues = Vec::new();
        if self.dlmm.is_some() {
            venues.push(Venue::Dlmm);
        }
        if self.whirlpool.is_some() {
            venues.push(Venue::Whirlpool);
        }
        if self.clmm.is_some() {
            venues.push(Venue::Clmm);
        }
        venues
    }
}

/// Map a custom program error code from a failed simulation to our
/// taxonomy. Unknown codes stay fatal with the code surfaced.
pub fn classify_program_error(venue: Venue, code: u32) -> Error {
    let (slippage, paused) = match venue {
        Venue::Dlmm => (
            dlmm::errors::EXCEEDED_AMOUNT_SLIPPAGE,
            dlmm::errors::PAIR_DISABLED,
        ),
        Venue::Whirlpool => (
            whirlpool::errors::TOKEN_MAX_EXCEEDED,
            whirlpool::errors::POOL_PAUSED,
        ),
        Venue::Clmm => (
            clmm::errors::PRICE_SLIPPAGE_CHECK,
            clmm::errors::POOL_DISABLED,
        ),
    };
    if code == slippage {
        // bps filled in by the composer which knows the attempt
        Error::SlippageExceeded { bps: 0 }
    } else if code == paused {
        Error::PoolPaused(format!("{} program error {:#x}", venue, code))
    } else if code == SPL_INSUFFICIENT_FUNDS {
        Error::InsufficientFunds(format!("token program error {:#x}", code))
    } else {
        Error::Internal(format!("unknown {} program error {:#x}", venue, code))
    }
}

/// SPL token program InsufficientFunds error code
const SPL_INSUFFICIENT_FUNDS: u32 = 1;

/// Extract and classify a custom program error from simulation output.
/// Non-program failures (preflight, account not found) stay fatal.
pub fn classify_simulation_failure(venue: Venue, err: &str, logs: &[String]) -> Error {
    if let Some(code) = extract_custom_error(err) {
        return classify_program_error(venue, code);
    }
    for log in logs {
        if let Some(code) = extract_custom_error(log) {
            return classify_program_error(venue, code);
        }
        if log.contains("insufficient lamports") {
            return Error::InsufficientFunds(log.clone());
        }
    }
    Error::Internal(format!("simulation failed: {}", err))
}

/// Parse `custom program error: 0x1771`-style fragments
fn extract_custom_error(s: &str) -> Option<u32> {
    let marker = "custom program error: ";
    let idx = s.find(marker)? + marker.len();
    let rest = &s[idx..];
    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == 'x')
        .collect();
    if let Some(hex) = token.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenInfo;

    fn pool(venue: Venue, granularity: Granularity, active: i32) -> Pool {
        Pool {
            address: "pool".into(),
            venue,
            token_a: TokenInfo {
                mint: "So11111111111111111111111111111111111111112".into(),
                symbol: "SOL".into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
                symbol: "USDC".into(),
                decimals: 6,
            },
            current_price: 150.0,
            active_index: active,
            granularity,
            tvl_usd: 1_000_000.0,
            volume_24h_usd: 100_000.0,
            fee_bps: 30,
            apr: 25.0,
            risk_score: 3,
        }
    }

    #[test]
    fn test_compute_range_shapes() {
        let p = pool(Venue::Dlmm, Granularity::BinStep(10), 5000);
        assert_eq!(
            compute_range(&p, &RangeShape::Concentrated).unwrap(),
            (4950, 5050)
        );
        assert_eq!(compute_range(&p, &RangeShape::Wide).unwrap(), (4800, 5200));

        let t = pool(Venue::Whirlpool, Granularity::TickSpacing(64), 1280);
        assert_eq!(
            compute_range(&t, &RangeShape::Concentrated).unwrap(),
            (960, 1600)
        );
    }

    #[test]
    fn test_compute_range_custom_validates() {
        let t = pool(Venue::Clmm, Granularity::TickSpacing(64), 0);
        assert!(compute_range(&t, &RangeShape::Custom { lower: 0, upper: 0 }).is_err());
        assert!(compute_range(
            &t,
            &RangeShape::Custom {
                lower: 128,
                upper: -128
            }
        )
        .is_err());
        assert!(compute_range(
            &t,
            &RangeShape::Custom {
                lower: 100,
                upper: 200
            }
        )
        .is_err());
        assert_eq!(
            compute_range(
                &t,
                &RangeShape::Custom {
                    lower: -128,
                    upper: 128
                }
            )
            .unwrap(),
            (-128, 128)
        );
    }

    #[test]
    fn test_extract_custom_error() {
        assert_eq!(
            extract_custom_error("Error processing Instruction 2: custom program error: 0x1771"),
            Some(0x1771)
        );
        assert_eq!(extract_custom_error("no error here"), None);
    }

    #[test]
    fn test_classify_program_error() {
        let e = classify_program_error(Venue::Dlmm, dlmm::errors::EXCEEDED_AMOUNT_SLIPPAGE);
        assert!(matches!(e, Error::SlippageExceeded { .. }));
        let e = classify_program_error(Venue::Whirlpool, whirlpool::errors::POOL_PAUSED);
        assert!(matches!(e, Error::PoolPaused(_)));
        let e = classify_program_error(Venue::Clmm, 0xdead);
        assert!(matches!(e, Error::Internal(_)));
    }
}
