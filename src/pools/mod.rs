//! Pool aggregation across venues
//!
//! Fetches every enabled venue's index concurrently, normalizes into the
//! canonical Pool, caches per venue, then filters, dedups by unordered
//! token pair, and sorts.

pub mod risk;
pub mod tokens;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Pool, Venue};
use crate::venue::AdapterSet;

/// Sort order for pool listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Apr,
    Tvl,
    Volume,
    RiskAdjustedYield,
}

impl SortKey {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "apr" => Ok(SortKey::Apr),
            "tvl" => Ok(SortKey::Tvl),
            "volume" => Ok(SortKey::Volume),
            "risk" | "risk_adjusted" | "risk_adjusted_yield" => Ok(SortKey::RiskAdjustedYield),
            other => Err(Error::Validation(format!("unknown sort key: {}", other))),
        }
    }
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::RiskAdjustedYield
    }
}

/// Listing filters
#[derive(Debug, Clone, Default)]
pub struct PoolFilter {
    pub min_tvl_usd: Option<f64>,
    pub max_risk: Option<u8>,
    pub venue: Option<Venue>,
    pub sort: SortKey,
    pub limit: usize,
}

/// Cross-venue pool discovery with a per-venue TTL cache
pub struct PoolAggregator {
    adapters: Arc<AdapterSet>,
    cache: RwLock<HashMap<Venue, (Instant, Vec<Pool>)>>,
    ttl: Duration,
}

impl PoolAggregator {
    pub fn new(adapters: Arc<AdapterSet>, cache_ttl: Duration) -> Self {
        Self {
            adapters,
            cache: RwLock::new(HashMap::new()),
            ttl: cache_ttl,
        }
    }

    /// Top pools across venues after filtering, dedup and sort
    pub async fn list_top(&self, filter: &PoolFilter) -> Result<Vec<Pool>> {
        let mut pools = self.fetch_all(filter.venue).await?;

        if let Some(min_tvl) = filter.min_tvl_usd {
            pools.retain(|p| p.tvl_usd >= min_tvl);
        }
        if let Some(max_risk) = filter.max_risk {
            pools.retain(|p| p.risk_score <= max_risk);
        }

        let mut pools = dedup_by_pair(pools);
        sort_pools(&mut pools, filter.sort);

        if filter.limit > 0 {
            pools.truncate(filter.limit);
        }
        Ok(pools)
    }

    /// Single highest-APR pool for an unordered token-symbol pair
    pub async fn best_pool_for_pair(&self, sym_a: &str, sym_b: &str) -> Result<Pool> {
        let want = normalize_pair(sym_a, sym_b);
        let pools = self.fetch_all(None).await?;
        pools
            .into_iter()
            .filter(|p| p.symbol_pair() == want)
            .max_by(|a, b| a.apr.total_cmp(&b.apr))
            .ok_or_else(|| Error::NotFound(format!("no pool for pair {}-{}", sym_a, sym_b)))
    }

    /// Pool details with the risk score attached
    pub async fn describe(&self, venue: Venue, address: &str) -> Result<Pool> {
        let adapter = self.adapters.adapter_for(venue)?;
        let mut pool = adapter.describe_pool(address).await?;
        pool.risk_score = risk::score(&pool);
        Ok(pool)
    }

    /// Every enabled venue's pool list, served from cache when fresh.
    /// A single venue outage degrades coverage instead of failing the
    /// whole listing; an empty union still surfaces the outage.
    async fn fetch_all(&self, only: Option<Venue>) -> Result<Vec<Pool>> {
        let venues: Vec<Venue> = self
            .adapters
            .enabled()
            .into_iter()
            .filter(|v| only.map_or(true, |o| o == *v))
            .collect();
        if venues.is_empty() {
            return Err(Error::Validation("no enabled venue matches filter".into()));
        }

        let fetches = venues.iter().map(|venue| self.fetch_venue(*venue));
        let results = futures::future::join_all(fetches).await;

        let mut pools = Vec::new();
        let mut last_err = None;
        for (venue, result) in venues.iter().zip(results) {
            match result {
                Ok(mut venue_pools) => pools.append(&mut venue_pools),
                Err(e) => {
                    warn!("pool fetch failed for {}: {}", venue, e);
                    last_err = Some(e);
                }
            }
        }
        if pools.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(pools)
    }

    async fn fetch_venue(&self, venue: Venue) -> Result<Vec<Pool>> {
        {
            let cache = self.cache.read().await;
            if let Some((at, pools)) = cache.get(&venue) {
                if at.elapsed() < self.ttl {
                    debug!("pool cache hit for {}", venue);
                    return Ok(pools.clone());
                }
            }
        }

        let adapter = self.adapters.adapter_for(venue)?;
        let mut pools = adapter.list_pools().await?;
        for pool in &mut pools {
            pool.risk_score = risk::score(pool);
        }

        self.cache
            .write()
            .await
            .insert(venue, (Instant::now(), pools.clone()));
        Ok(pools)
    }
}

/// Keep the highest-APR pool per unordered token-symbol pair
pub fn dedup_by_pair(pools: Vec<Pool>) -> Vec<Pool> {
    let mut best: HashMap<(String, String), Pool> = HashMap::new();
    for pool in pools {
        let key = pool.symbol_pair();
        match best.get(&key) {
            Some(existing) if existing.apr >= pool.apr => {}
            _ => {
                best.insert(key, pool);
            }
        }
    }
    best.into_values().collect()
}

pub fn sort_pools(pools: &mut [Pool], sort: SortKey) {
    match sort {
        SortKey::Apr => pools.sort_by(|a, b| b.apr.total_cmp(&a.apr)),
        SortKey::Tvl => pools.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd)),
        SortKey::Volume => pools.sort_by(|a, b| b.volume_24h_usd.total_cmp(&a.volume_24h_usd)),
        SortKey::RiskAdjustedYield => {
            pools.sort_by(|a, b| b.risk_adjusted_yield().total_cmp(&a.risk_adjusted_yield()))
        }
    }
}

fn normalize_pair(a: &str, b: &str) -> (String, String) {
    let a = a.to_uppercase();
    let b = b.to_uppercase();
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, TokenInfo};

    fn pool(venue: Venue, sym_a: &str, sym_b: &str, apr: f64, tvl: f64, risk: u8) -> Pool {
        Pool {
            address: format!("{}-{}-{}", venue, sym_a, sym_b),
            venue,
            token_a: TokenInfo {
                mint: format!("mint-{}", sym_a),
                symbol: sym_a.into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: format!("mint-{}", sym_b),
                symbol: sym_b.into(),
                decimals: 6,
            },
            current_price: 1.0,
            active_index: 0,
            granularity: match venue {
                Venue::Dlmm => Granularity::BinStep(10),
                _ => Granularity::TickSpacing(64),
            },
            tvl_usd: tvl,
            volume_24h_usd: tvl / 10.0,
            fee_bps: 30,
            apr,
            risk_score: risk,
        }
    }

    #[test]
    fn test_dedup_keeps_highest_apr() {
        let pools = vec![
            pool(Venue::Dlmm, "SOL", "USDC", 25.0, 1e6, 2),
            pool(Venue::Whirlpool, "USDC", "SOL", 40.0, 2e6, 2),
            pool(Venue::Clmm, "SOL", "USDC", 30.0, 3e6, 2),
            pool(Venue::Clmm, "JUP", "USDC", 15.0, 1e5, 4),
        ];
        let deduped = dedup_by_pair(pools);
        assert_eq!(deduped.len(), 2);
        let sol_usdc = deduped
            .iter()
            .find(|p| p.symbol_pair() == ("SOL".to_string(), "USDC".to_string()))
            .unwrap();
        assert_eq!(sol_usdc.venue, Venue::Whirlpool);
        assert_eq!(sol_usdc.apr, 40.0);

        // No two survivors share a pair
        let mut pairs: Vec<_> = deduped.iter().map(|p| p.symbol_pair()).collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), deduped.len());
    }

    #[test]
    fn test_sort_keys() {
        let mut pools = vec![
            pool(Venue::Dlmm, "A", "B", 10.0, 5e6, 5),
            pool(Venue::Dlmm, "C", "D", 30.0, 1e6, 10),
            pool(Venue::Dlmm, "E", "F", 20.0, 3e6, 1),
        ];
        sort_pools(&mut pools, SortKey::Apr);
        assert_eq!(pools[0].apr, 30.0);
        sort_pools(&mut pools, SortKey::Tvl);
        assert_eq!(pools[0].tvl_usd, 5e6);
        // risk-adjusted: 10/5=2, 30/10=3, 20/1=20
        sort_pools(&mut pools, SortKey::RiskAdjustedYield);
        assert_eq!(pools[0].token_a.symbol, "E");
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("apr").unwrap(), SortKey::Apr);
        assert_eq!(
            SortKey::parse("risk_adjusted_yield").unwrap(),
            SortKey::RiskAdjustedYield
        );
        assert!(SortKey::parse("bogus").is_err());
    }
}
