//! Canonical data model shared across venues
//!
//! Pools, positions, strategies, recipients and schedules are normalized
//! here so the composer and monitor never touch venue-specific layouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported concentrated-liquidity venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Dlmm,
    Whirlpool,
    Clmm,
}

impl Venue {
    pub const ALL: [Venue; 3] = [Venue::Dlmm, Venue::Whirlpool, Venue::Clmm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Dlmm => "DLMM",
            Venue::Whirlpool => "WHIRLPOOL",
            Venue::Clmm => "CLMM",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DLMM" | "METEORA" => Ok(Venue::Dlmm),
            "WHIRLPOOL" | "ORCA" => Ok(Venue::Whirlpool),
            "CLMM" | "RAYDIUM" => Ok(Venue::Clmm),
            other => Err(Error::Validation(format!("unknown venue: {}", other))),
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price-space granularity. Exactly one variant matches the venue:
/// bin step for DLMM, tick spacing for Whirlpool/CLMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Basis points of geometric price spacing between adjacent bins
    BinStep(u16),
    /// Tick delta of the legal grid over the 1.0001 sqrt-price curve
    TickSpacing(u16),
}

impl Granularity {
    /// Grid unit as an index delta
    pub fn unit(&self) -> i32 {
        match self {
            Granularity::BinStep(step) => *step as i32,
            Granularity::TickSpacing(spacing) => *spacing as i32,
        }
    }

    pub fn matches_venue(&self, venue: Venue) -> bool {
        matches!(
            (self, venue),
            (Granularity::BinStep(_), Venue::Dlmm)
                | (Granularity::TickSpacing(_), Venue::Whirlpool)
                | (Granularity::TickSpacing(_), Venue::Clmm)
        )
    }
}

/// Token side of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Canonical pool representation across venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub address: String,
    pub venue: Venue,
    pub token_a: TokenInfo,
    pub token_b: TokenInfo,
    /// Price of token A in units of token B
    pub current_price: f64,
    /// Active bin id (DLMM) or current tick (tick venues)
    pub active_index: i32,
    pub granularity: Granularity,
    pub tvl_usd: f64,
    pub volume_24h_usd: f64,
    pub fee_bps: u16,
    pub apr: f64,
    /// Derived risk score in [1, 10]
    pub risk_score: u8,
}

impl Pool {
    /// Unordered token-symbol pair, used for cross-venue dedup
    pub fn symbol_pair(&self) -> (String, String) {
        let a = self.token_a.symbol.to_uppercase();
        let b = self.token_b.symbol.to_uppercase();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// APR divided by risk score
    pub fn risk_adjusted_yield(&self) -> f64 {
        self.apr / self.risk_score.max(1) as f64
    }
}

/// A user's concentrated-liquidity claim, normalized across venues.
///
/// `id` is the position account address for DLMM and the position-NFT
/// mint for Whirlpool/CLMM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub wallet: String,
    pub pool: String,
    pub venue: Venue,
    pub lower_index: i32,
    pub upper_index: i32,
    pub lower_price: f64,
    pub upper_price: f64,
    pub liquidity: u128,
    pub amount_a: u64,
    pub amount_b: u64,
    pub fee_a: u64,
    pub fee_b: u64,
    /// Human-readable accrued fees (raw / 10^decimals)
    pub fee_a_ui: f64,
    pub fee_b_ui: f64,
    pub in_range: bool,
}

impl Position {
    pub fn contains_index(&self, index: i32) -> bool {
        index >= self.lower_index && index <= self.upper_index
    }
}

/// Requested range width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RangeShape {
    /// ±5 grid units around the active index
    Concentrated,
    /// ±20 grid units around the active index
    Wide,
    /// Caller-supplied indices, validated against the grid
    Custom { lower: i32, upper: i32 },
}

/// How liquidity is spread across bins (DLMM only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Distribution {
    Spot,
    Curve,
    BidAsk,
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Spot
    }
}

/// Relay tip urgency for an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TipUrgency {
    Fast,
    Turbo,
    Skip,
}

/// Pre-execution intent: what to enter, with how much, and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub venue: Venue,
    pub pool: String,
    pub collateral_mint: String,
    /// Raw amount in the collateral mint's native units
    pub collateral_amount: u64,
    pub shape: RangeShape,
    #[serde(default)]
    pub distribution: Distribution,
    pub slippage_bps: u16,
    pub urgency: TipUrgency,
}

/// Telegram delivery target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramTarget {
    pub chat_id: String,
}

/// Webhook delivery target; payloads are HMAC-signed with `secret`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    pub secret: String,
}

/// Per-recipient notification preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_true")]
    pub alert_out_of_range: bool,
    #[serde(default)]
    pub alert_back_in_range: bool,
    #[serde(default)]
    pub daily_summary: bool,
    #[serde(default)]
    pub auto_rebalance: bool,
    /// Minimum drift (bps of a grid unit, i.e. grid units x100) before
    /// auto-rebalance fires
    #[serde(default = "default_drift_bps")]
    pub rebalance_drift_bps: u32,
}

fn default_true() -> bool {
    true
}

fn default_drift_bps() -> u32 {
    200
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            alert_out_of_range: true,
            alert_back_in_range: false,
            daily_summary: false,
            auto_rebalance: false,
            rebalance_drift_bps: default_drift_bps(),
        }
    }
}

/// Notification target for a wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub wallet: String,
    pub telegram: Option<TelegramTarget>,
    pub webhook: Option<WebhookTarget>,
    #[serde(default)]
    pub preferences: Preferences,
}

impl Recipient {
    /// At least one transport must be enabled
    pub fn validate(&self) -> Result<()> {
        if self.telegram.is_none() && self.webhook.is_none() {
            return Err(Error::Validation(
                "recipient needs at least one transport (telegram or webhook)".into(),
            ));
        }
        Ok(())
    }
}

/// DCA schedule lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Complete,
    Cancelled,
    Failed,
}

/// Recurring deposit plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub wallet: String,
    pub pool: String,
    pub venue: Venue,
    /// Raw collateral amount per execution
    pub amount_per_tick: u64,
    pub total_budget: u64,
    pub spent: u64,
    pub interval_secs: u64,
    pub next_tick: DateTime<Utc>,
    pub executions: u32,
    pub max_executions: u32,
    pub shape: RangeShape,
    pub status: ScheduleStatus,
    pub last_error: Option<String>,
}

impl Schedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Active && self.next_tick <= now
    }

    /// Budget or execution cap reached
    pub fn is_exhausted(&self) -> bool {
        self.spent >= self.total_budget || self.executions >= self.max_executions
    }
}

/// Monitoring shadow of an on-chain position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub position_id: String,
    pub wallet: String,
    pub pool: String,
    pub venue: Venue,
    pub lower_index: i32,
    pub upper_index: i32,
    pub last_checked: DateTime<Utc>,
    pub last_in_range: bool,
    pub out_of_range_since: Option<DateTime<Utc>>,
}

impl TrackedPosition {
    pub fn contains_index(&self, index: i32) -> bool {
        index >= self.lower_index && index <= self.upper_index
    }

    /// Distance of `index` from the nearest range edge, in grid units.
    /// Zero while in range.
    pub fn drift_units(&self, index: i32, granularity: Granularity) -> u32 {
        let unit = granularity.unit().max(1);
        let distance = if index < self.lower_index {
            self.lower_index - index
        } else if index > self.upper_index {
            index - self.upper_index
        } else {
            0
        };
        (distance / unit).max(if distance > 0 { 1 } else { 0 }) as u32
    }
}

/// Process-wide monitor state, persisted in the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerState {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub checks_completed: u64,
    pub errors: u64,
}

/// Wallet profile persisted under `lp:user:<walletId>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub wallet_id: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool(venue: Venue, sym_a: &str, sym_b: &str, apr: f64, risk: u8) -> Pool {
        Pool {
            address: "pool".into(),
            venue,
            token_a: TokenInfo {
                mint: "mintA".into(),
                symbol: sym_a.into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: "mintB".into(),
                symbol: sym_b.into(),
                decimals: 6,
            },
            current_price: 150.0,
            active_index: 0,
            granularity: match venue {
                Venue::Dlmm => Granularity::BinStep(10),
                _ => Granularity::TickSpacing(64),
            },
            tvl_usd: 1_000_000.0,
            volume_24h_usd: 250_000.0,
            fee_bps: 30,
            apr,
            risk_score: risk,
        }
    }

    #[test]
    fn test_symbol_pair_is_unordered() {
        let a = sample_pool(Venue::Dlmm, "SOL", "USDC", 10.0, 2);
        let b = sample_pool(Venue::Clmm, "usdc", "sol", 12.0, 3);
        assert_eq!(a.symbol_pair(), b.symbol_pair());
    }

    #[test]
    fn test_granularity_matches_venue() {
        assert!(Granularity::BinStep(10).matches_venue(Venue::Dlmm));
        assert!(!Granularity::BinStep(10).matches_venue(Venue::Whirlpool));
        assert!(Granularity::TickSpacing(64).matches_venue(Venue::Clmm));
    }

    #[test]
    fn test_recipient_requires_transport() {
        let mut r = Recipient {
            wallet: "w".into(),
            telegram: None,
            webhook: None,
            preferences: Preferences::default(),
        };
        assert!(r.validate().is_err());
        r.telegram = Some(TelegramTarget {
            chat_id: "123".into(),
        });
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_drift_units() {
        let tracked = TrackedPosition {
            position_id: "p".into(),
            wallet: "w".into(),
            pool: "pool".into(),
            venue: Venue::Dlmm,
            lower_index: 4950,
            upper_index: 5050,
            last_checked: Utc::now(),
            last_in_range: true,
            out_of_range_since: None,
        };
        let g = Granularity::BinStep(10);
        assert_eq!(tracked.drift_units(5000, g), 0);
        assert_eq!(tracked.drift_units(5060, g), 1);
        assert_eq!(tracked.drift_units(5150, g), 10);
        assert_eq!(tracked.drift_units(4900, g), 5);
        // Sub-unit overshoot still counts as one unit of drift
        assert_eq!(tracked.drift_units(5051, g), 1);
    }

    #[test]
    fn test_schedule_due_and_exhausted() {
        let now = Utc::now();
        let mut s = Schedule {
            id: "dca1".into(),
            wallet: "w".into(),
            pool: "pool".into(),
            venue: Venue::Dlmm,
            amount_per_tick: 100_000_000,
            total_budget: 1_000_000_000,
            spent: 300_000_000,
            interval_secs: 86_400,
            next_tick: now - chrono::Duration::minutes(1),
            executions: 3,
            max_executions: 10,
            shape: RangeShape::Concentrated,
            status: ScheduleStatus::Active,
            last_error: None,
        };
        assert!(s.is_due(now));
        assert!(!s.is_exhausted());
        s.spent = s.total_budget;
        assert!(s.is_exhausted());
        s.status = ScheduleStatus::Paused;
        assert!(!s.is_due(now));
    }
}
