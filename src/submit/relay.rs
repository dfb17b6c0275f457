//! Private relay client
//!
//! Submits signed transaction bundles to the block engine and polls for
//! their outcome. A bundle is accepted or rejected atomically.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::types::TipUrgency;

/// Relay tip accounts; one is picked at random per bundle
pub const TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

/// Final state the relay reports for a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleOutcome {
    Landed,
    Dropped,
    Failed(String),
}

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: T,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct BundleStatusContext {
    value: Option<Vec<BundleStatusItem>>,
}

#[derive(Deserialize, Debug)]
struct BundleStatusItem {
    #[serde(default)]
    status: String,
    #[serde(default)]
    confirmation_status: Option<String>,
}

/// Block-engine client
pub struct RelayClient {
    config: RelayConfig,
    tip_accounts: Vec<Pubkey>,
    http: Client,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let tip_accounts = TIP_ACCOUNTS
            .iter()
            .map(|s| Pubkey::from_str(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("invalid tip account: {}", e)))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        info!("Relay client initialized for {}", config.block_engine_url);

        Ok(Self {
            config,
            tip_accounts,
            http,
        })
    }

    /// Submit a signed bundle; returns the relay's bundle id
    pub async fn submit_bundle(&self, transactions: &[Transaction]) -> Result<String> {
        if transactions.is_empty() {
            return Err(Error::Validation("empty bundle".into()));
        }
        if transactions.len() > 5 {
            return Err(Error::Validation(
                "bundle cannot contain more than 5 transactions".into(),
            ));
        }

        let encoded: Vec<String> = transactions
            .iter()
            .map(|tx| {
                let bytes = bincode::serialize(tx)
                    .map_err(|e| Error::Serialization(format!("bundle tx: {}", e)))?;
                Ok(bs58::encode(&bytes).into_string())
            })
            .collect::<Result<Vec<_>>>()?;

        let url = format!("{}/api/v1/bundles", self.config.block_engine_url);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "sendBundle",
            params: [&encoded],
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::BundleDropped("relay rate limited".into()));
        }
        if !status.is_success() {
            let err = Error::BundleDropped(format!("relay HTTP {}: {}", status, body));
            return Err(if status.is_server_error() {
                err
            } else {
                Error::Internal(format!("relay rejected bundle: {} {}", status, body))
            });
        }

        let parsed: JsonRpcResponse<String> = serde_json::from_str(&body)
            .map_err(|e| Error::Serialization(format!("relay response: {} ({})", e, body)))?;
        if let Some(error) = parsed.error {
            return Err(Error::BundleDropped(format!(
                "relay error {}: {}",
                error.code, error.message
            )));
        }
        let bundle_id = parsed
            .result
            .ok_or_else(|| Error::BundleDropped("relay returned no bundle id".into()))?;
        info!("Bundle submitted: {}", bundle_id);
        Ok(bundle_id)
    }

    /// Poll the relay until the bundle resolves or the timeout lapses
    pub async fn wait_for_bundle(&self, bundle_id: &str, timeout: Duration) -> Result<BundleOutcome> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match self.bundle_status(bundle_id).await {
                Ok(Some(outcome)) => {
                    match &outcome {
                        BundleOutcome::Landed => info!("Bundle {} landed", bundle_id),
                        BundleOutcome::Dropped => warn!("Bundle {} dropped", bundle_id),
                        BundleOutcome::Failed(reason) => {
                            warn!("Bundle {} failed: {}", bundle_id, reason)
                        }
                    }
                    return Ok(outcome);
                }
                Ok(None) => debug!("Bundle {} still pending", bundle_id),
                Err(e) => debug!("Bundle status poll failed: {}", e),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(Error::BundleTimeout(timeout.as_secs()))
    }

    /// One status poll; None while the relay is still working
    async fn bundle_status(&self, bundle_id: &str) -> Result<Option<BundleOutcome>> {
        let url = format!("{}/api/v1/bundles", self.config.block_engine_url);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "getBundleStatuses",
            params: [[bundle_id]],
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let body = response.text().await.unwrap_or_default();

        let parsed: JsonRpcResponse<BundleStatusContext> = serde_json::from_str(&body)
            .map_err(|e| Error::Serialization(format!("bundle status: {}", e)))?;
        let Some(item) = parsed
            .result
            .and_then(|ctx| ctx.value)
            .and_then(|v| v.into_iter().next())
        else {
            return Ok(None);
        };

        let status = item
            .confirmation_status
            .unwrap_or_else(|| item.status.clone());
        Ok(parse_status(&status))
    }

    /// Random tip account for this bundle
    pub fn tip_account(&self) -> Pubkey {
        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..self.tip_accounts.len());
        self.tip_accounts[idx]
    }

    /// Fixed tip schedule keyed by urgency; SKIP pays nothing
    pub fn tip_lamports(&self, urgency: TipUrgency) -> u64 {
        match urgency {
            TipUrgency::Fast => self.config.tip_fast_lamports,
            TipUrgency::Turbo => self.config.tip_turbo_lamports,
            TipUrgency::Skip => 0,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

fn parse_status(status: &str) -> Option<BundleOutcome> {
    match status.to_lowercase().as_str() {
        "landed" | "finalized" | "confirmed" => Some(BundleOutcome::Landed),
        "dropped" => Some(BundleOutcome::Dropped),
        "failed" | "invalid" => Some(BundleOutcome::Failed(status.to_string())),
        "pending" | "processing" | "" => None,
        other => {
            debug!("unknown bundle status: {}", other);
            None
        }
    }
}

fn classify_transport(e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::BundleTimeout(10)
    } else {
        Error::BundleDropped(format!("relay transport: {}", e))
    }
}

/// Tip transfer instruction appended to a bundle's final transaction
pub fn tip_instruction(
    from: &Pubkey,
    tip_account: &Pubkey,
    lamports: u64,
) -> solana_sdk::instruction::Instruction {
    solana_sdk::system_instruction::transfer(from, tip_account, lamports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> RelayClient {
        RelayClient::new(RelayConfig::default()).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert_eq!(client.tip_accounts.len(), 8);
    }

    #[test]
    fn test_tip_schedule() {
        let client = test_client();
        assert_eq!(client.tip_lamports(TipUrgency::Fast), 100_000);
        assert_eq!(client.tip_lamports(TipUrgency::Turbo), 1_000_000);
        assert_eq!(client.tip_lamports(TipUrgency::Skip), 0);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Landed"), Some(BundleOutcome::Landed));
        assert_eq!(parse_status("confirmed"), Some(BundleOutcome::Landed));
        assert_eq!(parse_status("dropped"), Some(BundleOutcome::Dropped));
        assert!(matches!(
            parse_status("Failed"),
            Some(BundleOutcome::Failed(_))
        ));
        assert_eq!(parse_status("pending"), None);
        assert_eq!(parse_status(""), None);
    }

    #[tokio::test]
    async fn test_empty_bundle_rejected() {
        let client = test_client();
        assert!(matches!(
            client.submit_bundle(&[]).await,
            Err(Error::Validation(_))
        ));
    }
}
