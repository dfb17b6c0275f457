//! Static token classification
//!
//! Mint registry for the majors the engine sees daily: symbol, decimals,
//! stable flag, and a volatility tier used by the risk scorer. Unknown
//! mints default to the most volatile tier.

/// Volatility tier in [1, 4]; stables are tier 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClass {
    pub symbol: &'static str,
    pub decimals: u8,
    pub stable: bool,
    pub volatility_tier: u8,
}

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

const REGISTRY: &[(&str, TokenClass)] = &[
    (
        USDC_MINT,
        TokenClass {
            symbol: "USDC",
            decimals: 6,
            stable: true,
            volatility_tier: 1,
        },
    ),
    (
        USDT_MINT,
        TokenClass {
            symbol: "USDT",
            decimals: 6,
            stable: true,
            volatility_tier: 1,
        },
    ),
    (
        "USDH1SM1ojwWUga67PGrgFWUHibbjqMvuMaDkRJTgkX",
        TokenClass {
            symbol: "USDH",
            decimals: 6,
            stable: true,
            volatility_tier: 1,
        },
    ),
    (
        WSOL_MINT,
        TokenClass {
            symbol: "SOL",
            decimals: 9,
            stable: false,
            volatility_tier: 2,
        },
    ),
    (
        "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So",
        TokenClass {
            symbol: "mSOL",
            decimals: 9,
            stable: false,
            volatility_tier: 2,
        },
    ),
    (
        "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn",
        TokenClass {
            symbol: "JitoSOL",
            decimals: 9,
            stable: false,
            volatility_tier: 2,
        },
    ),
    (
        "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN",
        TokenClass {
            symbol: "JUP",
            decimals: 6,
            stable: false,
            volatility_tier: 3,
        },
    ),
    (
        "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R",
        TokenClass {
            symbol: "RAY",
            decimals: 6,
            stable: false,
            volatility_tier: 3,
        },
    ),
    (
        "orcaEKTdK7LKz57vaAYr9QeNsVEPfiu6QeMU1kektZE",
        TokenClass {
            symbol: "ORCA",
            decimals: 6,
            stable: false,
            volatility_tier: 3,
        },
    ),
    (
        "HZ1JovNiVvGrGNiiYvEozEVgZ58xaU3RKwX8eACQBCt3",
        TokenClass {
            symbol: "PYTH",
            decimals: 6,
            stable: false,
            volatility_tier: 3,
        },
    ),
    (
        "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263",
        TokenClass {
            symbol: "BONK",
            decimals: 5,
            stable: false,
            volatility_tier: 4,
        },
    ),
    (
        "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm",
        TokenClass {
            symbol: "WIF",
            decimals: 6,
            stable: false,
            volatility_tier: 4,
        },
    ),
];

const UNKNOWN: TokenClass = TokenClass {
    symbol: "?",
    decimals: 9,
    stable: false,
    volatility_tier: 4,
};

pub fn classify(mint: &str) -> TokenClass {
    REGISTRY
        .iter()
        .find(|(m, _)| *m == mint)
        .map(|(_, c)| *c)
        .unwrap_or(UNKNOWN)
}

pub fn is_stable(mint: &str) -> bool {
    classify(mint).stable
}

/// Decimals for a mint; defaults to 9 when unknown
pub fn decimals(mint: &str) -> u8 {
    classify(mint).decimals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_and_unknown() {
        assert_eq!(classify(USDC_MINT).symbol, "USDC");
        assert!(classify(USDC_MINT).stable);
        assert_eq!(classify(WSOL_MINT).decimals, 9);
        assert_eq!(classify("unknown-mint").volatility_tier, 4);
        assert!(!classify("unknown-mint").stable);
    }
}
