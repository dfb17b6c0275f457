//! Pool risk scoring
//!
//! Derived without external data: a volatility tier from the static
//! token classification, a TVL penalty, and a thin-volume penalty,
//! clamped to [1, 10].

use crate::pools::tokens;
use crate::types::Pool;

/// Score a pool in [1, 10]; lower is safer
pub fn score(pool: &Pool) -> u8 {
    let a = tokens::classify(&pool.token_a.mint);
    let b = tokens::classify(&pool.token_b.mint);

    if a.stable && b.stable {
        return 1;
    }

    let mut score: i32 = a.volatility_tier.max(b.volatility_tier) as i32;

    score += tvl_penalty(pool.tvl_usd);

    // Thin trading relative to locked value
    if pool.tvl_usd > 0.0 && pool.volume_24h_usd / pool.tvl_usd < 0.01 {
        score += 1;
    }

    if a.stable || b.stable {
        score -= 1;
    }

    score.clamp(1, 10) as u8
}

/// 0-3 penalty with steps at $50k, $200k, $1M
fn tvl_penalty(tvl_usd: f64) -> i32 {
    if tvl_usd < 50_000.0 {
        3
    } else if tvl_usd < 200_000.0 {
        2
    } else if tvl_usd < 1_000_000.0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, TokenInfo, Venue};

    fn pool(mint_a: &str, mint_b: &str, tvl: f64, volume: f64) -> Pool {
        Pool {
            address: "pool".into(),
            venue: Venue::Dlmm,
            token_a: TokenInfo {
                mint: mint_a.into(),
                symbol: "A".into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: mint_b.into(),
                symbol: "B".into(),
                decimals: 6,
            },
            current_price: 1.0,
            active_index: 0,
            granularity: Granularity::BinStep(1),
            tvl_usd: tvl,
            volume_24h_usd: volume,
            fee_bps: 1,
            apr: 5.0,
            risk_score: 0,
        }
    }

    #[test]
    fn test_stable_pair_is_one() {
        let p = pool(tokens::USDC_MINT, tokens::USDT_MINT, 10.0, 0.0);
        assert_eq!(score(&p), 1);
    }

    #[test]
    fn test_sol_usdc_deep_pool() {
        // SOL tier 2, no TVL penalty, healthy volume, stable discount
        let p = pool(tokens::WSOL_MINT, tokens::USDC_MINT, 5_000_000.0, 500_000.0);
        assert_eq!(score(&p), 1);
    }

    #[test]
    fn test_shallow_meme_pool() {
        // Unknown mint tier 4 + TVL penalty 3 + dead volume 1 = 8
        let p = pool("SomeRandomMint11111111111111111111111111111", tokens::WSOL_MINT, 10_000.0, 50.0);
        assert_eq!(score(&p), 8);
    }

    #[test]
    fn test_score_clamped() {
        let p = pool(
            "SomeRandomMint11111111111111111111111111111",
            "AnotherRandomMint111111111111111111111111111",
            0.0,
            0.0,
        );
        assert!(score(&p) <= 10);
        assert!(score(&p) >= 1);
    }

    #[test]
    fn test_tvl_penalty_steps() {
        assert_eq!(tvl_penalty(10_000.0), 3);
        assert_eq!(tvl_penalty(50_000.0), 2);
        assert_eq!(tvl_penalty(200_000.0), 1);
        assert_eq!(tvl_penalty(1_000_000.0), 0);
    }
}
