//! Position indexing
//!
//! Scans a wallet's positions across all venues in parallel and caches
//! the result briefly. Every execution that touches the wallet
//! invalidates its cache entry, so callers reconcile against fresh
//! on-chain state after a submission.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Position;
use crate::venue::AdapterSet;

pub struct PositionIndexer {
    adapters: Arc<AdapterSet>,
    cache: RwLock<HashMap<String, (Instant, Vec<Position>)>>,
    ttl: Duration,
}

impl PositionIndexer {
    pub fn new(adapters: Arc<AdapterSet>) -> Self {
        Self {
            adapters,
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(30),
        }
    }

    /// All of a wallet's positions across venues
    pub async fn list(&self, wallet: &str) -> Result<Vec<Position>> {
        {
            let cache = self.cache.read().await;
            if let Some((at, positions)) = cache.get(wallet) {
                if at.elapsed() < self.ttl {
                    debug!("position cache hit for {}", wallet);
                    return Ok(positions.clone());
                }
            }
        }

        let owner = Pubkey::from_str(wallet)
            .map_err(|e| Error::Validation(format!("invalid wallet {}: {}", wallet, e)))?;

        let venues = self.adapters.enabled();
        let scans = venues.iter().map(|venue| {
            let adapters = self.adapters.clone();
            let venue = *venue;
            async move {
                let adapter = adapters.adapter_for(venue)?;
                adapter.enumerate_positions(&owner).await
            }
        });
        let results = futures::future::join_all(scans).await;

        let mut positions = Vec::new();
        let mut last_err = None;
        for (venue, result) in venues.iter().zip(results) {
            match result {
                Ok(mut venue_positions) => positions.append(&mut venue_positions),
                Err(e) => {
                    warn!("position scan failed on {}: {}", venue, e);
                    last_err = Some(e);
                }
            }
        }
        // All venues down is an error; a partial scan is served as-is
        if positions.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        self.cache
            .write()
            .await
            .insert(wallet.to_string(), (Instant::now(), positions.clone()));
        Ok(positions)
    }

    /// Drop the cache entry after an execution for this wallet
    pub async fn invalidate(&self, wallet: &str) {
        self.cache.write().await.remove(wallet);
        debug!("position cache invalidated for {}", wallet);
    }

    /// One position by id, freshly scanned
    pub async fn find(&self, wallet: &str, position_id: &str) -> Result<Position> {
        self.invalidate(wallet).await;
        self.list(wallet)
            .await?
            .into_iter()
            .find(|p| p.id == position_id)
            .ok_or_else(|| Error::NotFound(format!("position {}", position_id)))
    }
}
