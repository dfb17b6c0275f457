//! Tick and bin math shared by the venue adapters
//!
//! Tick venues index price as 1.0001^tick and linearise liquidity over
//! the sqrt-price grid; DLMM partitions price into geometric bins of
//! `bin_step` basis points.

use crate::error::{Error, Result};
use crate::types::Granularity;

/// Base of the tick price curve
pub const TICK_BASE: f64 = 1.0001;

/// Legal tick bounds shared by the tick venues
pub const MIN_TICK: i32 = -443_636;
pub const MAX_TICK: i32 = 443_636;

/// Legal bin id bounds for DLMM
pub const MIN_BIN_ID: i32 = -443_636;
pub const MAX_BIN_ID: i32 = 443_636;

/// Grid units around the active index for CONCENTRATED ranges
pub const CONCENTRATED_UNITS: i32 = 5;
/// Grid units around the active index for WIDE ranges
pub const WIDE_UNITS: i32 = 20;

/// Price of a tick: 1.0001^tick
pub fn tick_to_price(tick: i32) -> f64 {
    TICK_BASE.powi(tick)
}

/// Largest tick whose price does not exceed `price`
pub fn price_to_tick(price: f64) -> i32 {
    (price.ln() / TICK_BASE.ln()).floor() as i32
}

/// Sqrt price at a tick: 1.0001^(tick/2)
pub fn sqrt_price_at_tick(tick: i32) -> f64 {
    TICK_BASE.powf(tick as f64 / 2.0)
}

/// Lower price bound of a DLMM bin: (1 + step/10000)^bin_id
pub fn bin_price(bin_id: i32, bin_step: u16) -> f64 {
    (1.0 + bin_step as f64 / 10_000.0).powi(bin_id)
}

/// Geometric mean of a bin's price bounds
pub fn bin_mid_price(bin_id: i32, bin_step: u16) -> f64 {
    let ratio = 1.0 + bin_step as f64 / 10_000.0;
    bin_price(bin_id, bin_step) * ratio.sqrt()
}

/// Largest bin id whose price does not exceed `price`
pub fn price_to_bin(price: f64, bin_step: u16) -> i32 {
    let ratio = 1.0 + bin_step as f64 / 10_000.0;
    (price.ln() / ratio.ln()).floor() as i32
}

fn floor_to_spacing(value: i32, spacing: i32) -> i32 {
    value.div_euclid(spacing) * spacing
}

fn ceil_to_spacing(value: i32, spacing: i32) -> i32 {
    -((-value).div_euclid(spacing)) * spacing
}

/// Snap a symmetric tick range to the legal grid.
///
/// Bounds are truncated toward the current tick, never rounded outward,
/// so the result stays strictly inside the intended width.
pub fn snap_tick_range(current: i32, spacing: u16, units: i32) -> (i32, i32) {
    let spacing = spacing.max(1) as i32;
    let lower = ceil_to_spacing(current - units * spacing, spacing).clamp(MIN_TICK, MAX_TICK);
    let upper = floor_to_spacing(current + units * spacing, spacing).clamp(MIN_TICK, MAX_TICK);
    (lower, upper)
}

/// Symmetric bin range around the active bin, offset in bin-step units
/// and clamped to the legal id range.
pub fn snap_bin_range(active: i32, bin_step: u16, units: i32) -> (i32, i32) {
    let step = bin_step.max(1) as i32;
    let lower = (active - units * step).clamp(MIN_BIN_ID, MAX_BIN_ID);
    let upper = (active + units * step).clamp(MIN_BIN_ID, MAX_BIN_ID);
    (lower, upper)
}

/// Validate a caller-supplied range against the pool grid: rejects
/// crossing, zero-width, and grid-unaligned bounds.
pub fn validate_custom_range(lower: i32, upper: i32, granularity: Granularity) -> Result<()> {
    if lower >= upper {
        return Err(Error::Validation(format!(
            "range must satisfy lower < upper, got [{}, {}]",
            lower, upper
        )));
    }
    match granularity {
        Granularity::TickSpacing(spacing) => {
            let spacing = spacing.max(1) as i32;
            if lower % spacing != 0 || upper % spacing != 0 {
                return Err(Error::Validation(format!(
                    "range [{}, {}] not aligned to tick spacing {}",
                    lower, upper, spacing
                )));
            }
            if !(MIN_TICK..=MAX_TICK).contains(&lower) || !(MIN_TICK..=MAX_TICK).contains(&upper) {
                return Err(Error::Validation("range outside legal tick bounds".into()));
            }
        }
        Granularity::BinStep(_) => {
            if !(MIN_BIN_ID..=MAX_BIN_ID).contains(&lower)
                || !(MIN_BIN_ID..=MAX_BIN_ID).contains(&upper)
            {
                return Err(Error::Validation("range outside legal bin bounds".into()));
            }
        }
    }
    Ok(())
}

/// Liquidity quote for a prospective deposit
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityQuote {
    /// Venue liquidity scalar
    pub liquidity: u128,
    pub expected_a: u64,
    pub expected_b: u64,
    /// Upper deposit bounds under the slippage-shifted price
    pub worst_a: u64,
    pub worst_b: u64,
}

/// Token amounts a given liquidity requires at sqrt price `sp` over
/// sqrt bounds [sa, sb]. The canonical amount-from-L formulas.
fn amounts_for_liquidity(liquidity: f64, sp: f64, sa: f64, sb: f64) -> (f64, f64) {
    if sp <= sa {
        (liquidity * (sb - sa) / (sa * sb), 0.0)
    } else if sp >= sb {
        (0.0, liquidity * (sb - sa))
    } else {
        (
            liquidity * (sb - sp) / (sp * sb),
            liquidity * (sp - sa),
        )
    }
}

/// Max liquidity fundable by the given amounts at sqrt price `sp`
fn liquidity_for_amounts(amount_a: f64, amount_b: f64, sp: f64, sa: f64, sb: f64) -> f64 {
    if sp <= sa {
        amount_a * (sa * sb) / (sb - sa)
    } else if sp >= sb {
        amount_b / (sb - sa)
    } else {
        let l_a = amount_a * (sp * sb) / (sb - sp);
        let l_b = amount_b / (sp - sa);
        l_a.min(l_b)
    }
}

/// Token amounts a position's liquidity represents at the current tick
pub fn amounts_at_tick(liquidity: u128, current_tick: i32, lower: i32, upper: i32) -> (u64, u64) {
    let sp = sqrt_price_at_tick(current_tick);
    let sa = sqrt_price_at_tick(lower);
    let sb = sqrt_price_at_tick(upper);
    let (a, b) = amounts_for_liquidity(liquidity as f64, sp, sa, sb);
    (a.max(0.0).floor() as u64, b.max(0.0).floor() as u64)
}

/// Quote a deposit on a tick venue.
///
/// Worst-case amounts reflect the slippage bound applied to sqrt price,
/// matching how the on-chain max-amount check is evaluated.
pub fn quote_tick_liquidity(
    current_tick: i32,
    lower_tick: i32,
    upper_tick: i32,
    amount_a: u64,
    amount_b: u64,
    slippage_bps: u16,
) -> Result<LiquidityQuote> {
    if lower_tick >= upper_tick {
        return Err(Error::Validation("empty tick range".into()));
    }
    let sp = sqrt_price_at_tick(current_tick);
    let sa = sqrt_price_at_tick(lower_tick);
    let sb = sqrt_price_at_tick(upper_tick);

    let liquidity = liquidity_for_amounts(amount_a as f64, amount_b as f64, sp, sa, sb);
    let (expected_a, expected_b) = amounts_for_liquidity(liquidity, sp, sa, sb);

    let slip = slippage_bps as f64 / 10_000.0;
    let sp_down = sp * (1.0 - slip).max(f64::EPSILON).sqrt();
    let sp_up = sp * (1.0 + slip).sqrt();
    // Price moving down demands more A, moving up demands more B
    let (worst_a, _) = amounts_for_liquidity(liquidity, sp_down, sa, sb);
    let (_, worst_b) = amounts_for_liquidity(liquidity, sp_up, sa, sb);

    Ok(LiquidityQuote {
        liquidity: liquidity.max(0.0) as u128,
        expected_a: expected_a.floor() as u64,
        expected_b: expected_b.floor() as u64,
        worst_a: worst_a.max(expected_a).ceil() as u64,
        worst_b: worst_b.max(expected_b).ceil() as u64,
    })
}

/// Quote a deposit on DLMM over bins [lower, upper].
///
/// Token B fills bins at and below the active bin, token A fills bins at
/// and above it; per-bin liquidity is `x * p + y` at the bin's geometric
/// mean price.
pub fn quote_bin_liquidity(
    active_bin: i32,
    lower_bin: i32,
    upper_bin: i32,
    bin_step: u16,
    amount_a: u64,
    amount_b: u64,
    slippage_bps: u16,
) -> Result<LiquidityQuote> {
    if lower_bin >= upper_bin {
        return Err(Error::Validation("empty bin range".into()));
    }

    let bins_below = (active_bin - lower_bin).max(0) as u64 + 1;
    let bins_above = (upper_bin - active_bin).max(0) as u64 + 1;

    let x_per_bin = amount_a as f64 / bins_above as f64;
    let y_per_bin = amount_b as f64 / bins_below as f64;

    let mut liquidity = 0.0;
    for bin in lower_bin..=upper_bin {
        let p = bin_mid_price(bin, bin_step);
        let x = if bin >= active_bin { x_per_bin } else { 0.0 };
        let y = if bin <= active_bin { y_per_bin } else { 0.0 };
        liquidity += x * p + y;
    }

    let slip = slippage_bps as f64 / 10_000.0;
    Ok(LiquidityQuote {
        liquidity: liquidity.max(0.0) as u128,
        expected_a: amount_a,
        expected_b: amount_b,
        worst_a: ((amount_a as f64) * (1.0 + slip)).ceil() as u64,
        worst_b: ((amount_b as f64) * (1.0 + slip)).ceil() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_to_bin_roundtrip() {
        for bin in [-3000, -1, 0, 1, 5000] {
            let price = bin_price(bin, 10);
            assert_eq!(price_to_bin(price * 1.0000001, 10), bin);
        }
    }

    #[test]
    fn test_tick_price_roundtrip() {
        for tick in [-100_000, -64, 0, 64, 100_000] {
            let price = tick_to_price(tick);
            assert_eq!(price_to_tick(price * 1.000001), tick);
        }
    }

    #[test]
    fn test_bin_range_literal() {
        // bin step 10, active bin 5000, CONCENTRATED => [4950, 5050]
        assert_eq!(snap_bin_range(5000, 10, CONCENTRATED_UNITS), (4950, 5050));
        assert_eq!(snap_bin_range(5000, 10, WIDE_UNITS), (4800, 5200));
    }

    #[test]
    fn test_bin_step_one() {
        assert_eq!(snap_bin_range(0, 1, CONCENTRATED_UNITS), (-5, 5));
        assert_eq!(snap_bin_range(0, 1, WIDE_UNITS), (-20, 20));
    }

    #[test]
    fn test_tick_range_aligned() {
        assert_eq!(snap_tick_range(1280, 64, CONCENTRATED_UNITS), (960, 1600));
        assert_eq!(snap_tick_range(0, 1, CONCENTRATED_UNITS), (-5, 5));
        assert_eq!(snap_tick_range(0, 1, WIDE_UNITS), (-20, 20));
    }

    #[test]
    fn test_tick_range_snaps_inward() {
        // current 70 with spacing 64: raw bounds [-250, 390] snap to
        // [-192, 384], both strictly inside the intended width
        let (lower, upper) = snap_tick_range(70, 64, CONCENTRATED_UNITS);
        assert_eq!(lower % 64, 0);
        assert_eq!(upper % 64, 0);
        assert!(lower >= 70 - 5 * 64);
        assert!(upper <= 70 + 5 * 64);
        assert_eq!((lower, upper), (-192, 384));
    }

    #[test]
    fn test_tick_range_negative_current() {
        let (lower, upper) = snap_tick_range(-70, 64, CONCENTRATED_UNITS);
        assert_eq!(lower % 64, 0);
        assert_eq!(upper % 64, 0);
        assert!(lower >= -70 - 5 * 64);
        assert!(upper <= -70 + 5 * 64);
    }

    #[test]
    fn test_custom_range_validation() {
        let g = Granularity::TickSpacing(64);
        // zero width
        assert!(validate_custom_range(128, 128, g).is_err());
        // crossing
        assert!(validate_custom_range(192, 128, g).is_err());
        // unaligned
        assert!(validate_custom_range(100, 192, g).is_err());
        // ok
        assert!(validate_custom_range(-128, 192, g).is_ok());

        let b = Granularity::BinStep(10);
        assert!(validate_custom_range(4950, 5050, b).is_ok());
        assert!(validate_custom_range(5050, 4950, b).is_err());
    }

    #[test]
    fn test_quote_tick_liquidity_in_range() {
        let quote = quote_tick_liquidity(0, -640, 640, 1_000_000, 1_000_000, 300).unwrap();
        assert!(quote.liquidity > 0);
        // One side is the binding constraint, neither expectation
        // exceeds the input
        assert!(quote.expected_a <= 1_000_000);
        assert!(quote.expected_b <= 1_000_000);
        // Worst case bounds the slippage-shifted deposit from above
        assert!(quote.worst_a >= quote.expected_a);
        assert!(quote.worst_b >= quote.expected_b);
    }

    #[test]
    fn test_quote_tick_liquidity_single_sided() {
        // Current price below the range: deposit is all token A
        let quote = quote_tick_liquidity(-2000, -640, 640, 1_000_000, 0, 300).unwrap();
        assert_eq!(quote.expected_b, 0);
        assert!(quote.expected_a > 0);
    }

    #[test]
    fn test_quote_bin_liquidity() {
        let quote =
            quote_bin_liquidity(5000, 4950, 5050, 10, 2_000_000, 2_000_000, 300).unwrap();
        assert!(quote.liquidity > 0);
        assert_eq!(quote.expected_a, 2_000_000);
        // 3% slippage headroom on the worst case
        assert_eq!(quote.worst_a, 2_060_000);
    }

    #[test]
    fn test_quote_rejects_empty_range() {
        assert!(quote_tick_liquidity(0, 64, 64, 1, 1, 300).is_err());
        assert!(quote_bin_liquidity(0, 5, 5, 10, 1, 1, 300).is_err());
    }
}
