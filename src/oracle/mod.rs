//! Oracle aggregation
//!
//! Two independent price sources per mint, queried in parallel: a
//! confidence-interval feed (primary) and an aggregator spot feed
//! (secondary). The aggregate is the median of live readings; it is
//! unreliable when everything is stale or sources diverge too far, and
//! the engine treats that as a hard gate on opening or rebalancing.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::error::{Error, Result};
use crate::pools::tokens;

/// Pyth feed ids for the mints the engine prices most often
const PYTH_FEEDS: &[(&str, &str)] = &[
    (
        tokens::WSOL_MINT,
        "ef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d",
    ),
    (
        tokens::USDC_MINT,
        "eaa020c61cc479712813461ce153894a96a6c00b21ed0cfc2798d1f9a9e9c94a",
    ),
    (
        tokens::USDT_MINT,
        "2b89b9dc8fdf9f34709a5b106b472f0f39bb6ca9ce04b0fd7f2e971688e2e53b",
    ),
];

/// One source's reading
#[derive(Debug, Clone)]
pub struct PriceReading {
    pub source: &'static str,
    pub price: f64,
    pub confidence: f64,
    pub publish_time: DateTime<Utc>,
}

impl PriceReading {
    fn is_stale(&self, now: DateTime<Utc>, stale_secs: u64) -> bool {
        now.signed_duration_since(self.publish_time)
            .num_seconds()
            .unsigned_abs()
            > stale_secs
    }
}

/// Aggregated result across sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub mint: String,
    /// Median of live source prices, in USD
    pub price: f64,
    /// Widest source confidence interval
    pub confidence: f64,
    pub sources: usize,
    pub unreliable: bool,
    pub fetched_at: DateTime<Utc>,
}

struct CacheEntry {
    at: std::time::Instant,
    value: AggregatedPrice,
}

/// Multi-source price aggregator with a short in-memory cache
pub struct OracleAggregator {
    config: OracleConfig,
    http: reqwest::Client,
    cache: tokio::sync::RwLock<HashMap<String, CacheEntry>>,
}

impl OracleAggregator {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            cache: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Aggregated price for a mint, cached briefly
    pub async fn price(&self, mint: &str) -> Result<AggregatedPrice> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(mint) {
                if entry.at.elapsed() < Duration::from_secs(self.config.cache_secs) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let per_source = Duration::from_secs(self.config.timeout_secs);
        let (primary, secondary) = tokio::join!(
            timeout(per_source, self.fetch_pyth(mint)),
            timeout(per_source, self.fetch_jupiter(mint)),
        );

        let mut readings = Vec::new();
        for result in [flatten(primary), flatten(secondary)] {
            match result {
                Ok(reading) => readings.push(reading),
                Err(e) => debug!("oracle source failed for {}: {}", mint, e),
            }
        }

        let aggregated = self.aggregate(mint, &readings)?;
        self.cache.write().await.insert(
            mint.to_string(),
            CacheEntry {
                at: std::time::Instant::now(),
                value: aggregated.clone(),
            },
        );
        Ok(aggregated)
    }

    /// Batch prices, capped upstream at 20 mints per request
    pub async fn prices(&self, mints: &[String]) -> Result<Vec<AggregatedPrice>> {
        let mut out = Vec::with_capacity(mints.len());
        for mint in mints {
            match self.price(mint).await {
                Ok(price) => out.push(price),
                Err(e) => {
                    warn!("price fetch failed for {}: {}", mint, e);
                    out.push(AggregatedPrice {
                        mint: mint.clone(),
                        price: 0.0,
                        confidence: 0.0,
                        sources: 0,
                        unreliable: true,
                        fetched_at: Utc::now(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn aggregate(&self, mint: &str, readings: &[PriceReading]) -> Result<AggregatedPrice> {
        if readings.is_empty() {
            return Err(Error::OracleUnreliable(format!(
                "no oracle source answered for {}",
                mint
            )));
        }
        let now = Utc::now();
        let live: Vec<&PriceReading> = readings
            .iter()
            .filter(|r| !r.is_stale(now, self.config.stale_secs))
            .collect();

        let all_stale = live.is_empty();
        let considered: Vec<&PriceReading> = if all_stale {
            readings.iter().collect()
        } else {
            live
        };

        let mut prices: Vec<f64> = considered.iter().map(|r| r.price).collect();
        prices.sort_by(|a, b| a.total_cmp(b));
        let price = median(&prices);
        let confidence = considered
            .iter()
            .map(|r| r.confidence)
            .fold(0.0f64, f64::max);

        let divergence_bps = max_pairwise_divergence_bps(&prices);
        // Inclusive bound: divergence at exactly the limit is unreliable
        let unreliable = all_stale || divergence_bps >= self.config.max_divergence_bps as f64;

        Ok(AggregatedPrice {
            mint: mint.to_string(),
            price,
            confidence,
            sources: considered.len(),
            unreliable,
            fetched_at: now,
        })
    }

    async fn fetch_pyth(&self, mint: &str) -> Result<PriceReading> {
        let feed_id = PYTH_FEEDS
            .iter()
            .find(|(m, _)| *m == mint)
            .map(|(_, id)| *id)
            .ok_or_else(|| Error::NotFound(format!("no pyth feed for {}", mint)))?;

        let url = format!(
            "{}/v2/updates/price/latest?ids[]={}",
            self.config.pyth_endpoint, feed_id
        );
        let response: PythResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("pyth: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("pyth decode: {}", e)))?;

        let parsed = response
            .parsed
            .first()
            .ok_or_else(|| Error::NotFound(format!("pyth feed {} empty", feed_id)))?;
        let scale = 10f64.powi(parsed.price.expo);
        let price = parsed.price.price.parse::<f64>().unwrap_or(0.0) * scale;
        let confidence = parsed.price.conf.parse::<f64>().unwrap_or(0.0) * scale;
        Ok(PriceReading {
            source: "pyth",
            price,
            confidence,
            publish_time: Utc
                .timestamp_opt(parsed.price.publish_time, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_jupiter(&self, mint: &str) -> Result<PriceReading> {
        let url = format!("{}?ids={}", self.config.jupiter_endpoint, mint);
        let response: JupiterPriceResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("jupiter price: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("jupiter price decode: {}", e)))?;

        let entry = response
            .data
            .get(mint)
            .and_then(|e| e.as_ref())
            .ok_or_else(|| Error::NotFound(format!("jupiter has no price for {}", mint)))?;
        let price = entry
            .price
            .parse::<f64>()
            .map_err(|e| Error::Serialization(format!("jupiter price parse: {}", e)))?;
        // Spot feed carries no timestamp; the fetch time stands in
        Ok(PriceReading {
            source: "jupiter",
            price,
            confidence: 0.0,
            publish_time: Utc::now(),
        })
    }
}

fn flatten<T>(r: std::result::Result<Result<T>, tokio::time::error::Elapsed>) -> Result<T> {
    match r {
        Ok(inner) => inner,
        Err(_) => Err(Error::VenueUnavailable("oracle source timed out".into())),
    }
}

/// Median of a sorted slice
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Largest pairwise divergence, in bps of the smaller price
fn max_pairwise_divergence_bps(prices: &[f64]) -> f64 {
    let mut max_bps = 0.0f64;
    for (i, a) in prices.iter().enumerate() {
        for b in &prices[i + 1..] {
            let low = a.min(*b);
            if low <= 0.0 {
                continue;
            }
            let bps = ((a - b).abs() / low) * 10_000.0;
            max_bps = max_bps.max(bps);
        }
    }
    max_bps
}

#[derive(Debug, Deserialize)]
struct PythResponse {
    parsed: Vec<PythParsed>,
}

#[derive(Debug, Deserialize)]
struct PythParsed {
    price: PythPrice,
}

#[derive(Debug, Deserialize)]
struct PythPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

#[derive(Debug, Deserialize)]
struct JupiterPriceResponse {
    data: HashMap<String, Option<JupiterPriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct JupiterPriceEntry {
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> OracleAggregator {
        OracleAggregator::new(OracleConfig::default()).unwrap()
    }

    fn reading(source: &'static str, price: f64, age_secs: i64) -> PriceReading {
        PriceReading {
            source,
            price,
            confidence: 0.01,
            publish_time: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 3.0]), 2.0);
        assert_eq!(median(&[5.0]), 5.0);
    }

    #[test]
    fn test_divergence_gate_inclusive() {
        let agg = aggregator();
        // 150.00 vs 151.20 is 0.80% apart: unreliable
        let result = agg
            .aggregate("m", &[reading("pyth", 150.0, 1), reading("jupiter", 151.2, 1)])
            .unwrap();
        assert!(result.unreliable);

        // Exactly 0.5% divergence is still unreliable
        let result = agg
            .aggregate("m", &[reading("pyth", 100.0, 1), reading("jupiter", 100.5, 1)])
            .unwrap();
        assert!(result.unreliable);

        // Just under the bound is fine
        let result = agg
            .aggregate("m", &[reading("pyth", 100.0, 1), reading("jupiter", 100.49, 1)])
            .unwrap();
        assert!(!result.unreliable);
        assert!((result.price - 100.245).abs() < 1e-9);
    }

    #[test]
    fn test_all_stale_is_unreliable() {
        let agg = aggregator();
        let result = agg
            .aggregate("m", &[reading("pyth", 150.0, 60), reading("jupiter", 150.0, 45)])
            .unwrap();
        assert!(result.unreliable);
        // Stale prices are still reported for observability
        assert_eq!(result.price, 150.0);
    }

    #[test]
    fn test_one_stale_source_drops_out() {
        let agg = aggregator();
        let result = agg
            .aggregate("m", &[reading("pyth", 150.0, 60), reading("jupiter", 149.9, 1)])
            .unwrap();
        assert!(!result.unreliable);
        assert_eq!(result.sources, 1);
        assert_eq!(result.price, 149.9);
    }

    #[test]
    fn test_no_readings_errors() {
        let agg = aggregator();
        assert!(matches!(
            agg.aggregate("m", &[]),
            Err(Error::OracleUnreliable(_))
        ));
    }

    #[test]
    fn test_confidence_is_widest() {
        let agg = aggregator();
        let mut a = reading("pyth", 150.0, 1);
        a.confidence = 0.5;
        let mut b = reading("jupiter", 150.1, 1);
        b.confidence = 0.2;
        let result = agg.aggregate("m", &[a, b]).unwrap();
        assert_eq!(result.confidence, 0.5);
    }
}
