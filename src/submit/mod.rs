//! Submission driver
//!
//! Drives a composed transaction list to finality in one of two modes:
//! an atomic private-relay bundle, or a direct-RPC sequence with a gap
//! between transactions. Within one intent the composed order is always
//! preserved; an abandoned in-flight submission is never retried, the
//! caller reconciles by re-reading positions.

pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::Venue;
use crate::venue::classify_simulation_failure;
use crate::wallet::SignerClient;
use relay::{BundleOutcome, RelayClient};

/// Delay between sequential sends so account state propagates
const SEQUENTIAL_GAP: Duration = Duration::from_secs(3);

/// One transaction ready for signing
pub struct PreparedTx {
    pub transaction: Transaction,
    pub label: String,
    /// Whether the pipeline's auxiliary keypairs co-sign this tx
    pub needs_aux: bool,
}

/// Submission mode selected per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    Bundle,
    Sequential,
}

/// What the driver reports back to the composer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub mode: SubmitMode,
    pub bundle_id: Option<String>,
    /// First signature of each landed transaction, in order
    pub landed_txs: Vec<String>,
    /// Index of the first failed transaction in sequential mode
    pub failed_at: Option<usize>,
    pub reason: Option<String>,
}

impl SubmitOutcome {
    pub fn landed(&self) -> bool {
        self.failed_at.is_none()
    }
}

/// Timeouts, 5xx and rate limits retry; everything else surfaces
fn is_transient(error: &Error) -> bool {
    matches!(
        error,
        Error::BundleDropped(_)
            | Error::BundleTimeout(_)
            | Error::RpcUnavailable(_)
            | Error::VenueUnavailable(_)
    )
}

pub struct SubmissionDriver {
    relay: Arc<RelayClient>,
    signer: Arc<SignerClient>,
    rpc: Arc<RpcClient>,
}

impl SubmissionDriver {
    pub fn new(relay: Arc<RelayClient>, signer: Arc<SignerClient>, rpc: Arc<RpcClient>) -> Self {
        Self { relay, signer, rpc }
    }

    pub async fn submit(
        &self,
        mode: SubmitMode,
        wallet_id: &str,
        venue: Venue,
        txs: Vec<PreparedTx>,
        aux_signers: &[Keypair],
    ) -> Result<SubmitOutcome> {
        match mode {
            SubmitMode::Bundle => self.submit_bundle(wallet_id, venue, txs, aux_signers).await,
            SubmitMode::Sequential => {
                self.submit_sequential(wallet_id, txs, aux_signers).await
            }
        }
    }

    /// Sign everything in order, submit atomically, poll to resolution.
    /// DROPPED and transient submission errors retry with exponential
    /// backoff; FAILED is classified against the venue's error codes.
    async fn submit_bundle(
        &self,
        wallet_id: &str,
        venue: Venue,
        txs: Vec<PreparedTx>,
        aux_signers: &[Keypair],
    ) -> Result<SubmitOutcome> {
        let signed = self.sign_all(wallet_id, txs, aux_signers).await?;
        let signatures: Vec<String> = signed
            .iter()
            .filter_map(|tx| tx.signatures.first().map(|s| s.to_string()))
            .collect();

        let max_retries = self.relay.config().max_retries;
        let base = Duration::from_secs(self.relay.config().retry_base_secs);
        let poll_timeout = Duration::from_secs(self.relay.config().bundle_timeout_secs);

        let mut attempt = 0u32;
        loop {
            let result = self.submit_bundle_once(&signed, poll_timeout).await;
            match result {
                Ok(bundle_id) => {
                    return Ok(SubmitOutcome {
                        mode: SubmitMode::Bundle,
                        bundle_id: Some(bundle_id),
                        landed_txs: signatures,
                        failed_at: None,
                        reason: None,
                    });
                }
                Err(e) if is_transient(&e) && attempt < max_retries => {
                    attempt += 1;
                    let delay = base * 2u32.pow(attempt - 1);
                    warn!(
                        "bundle attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Error::Internal(reason)) if reason.contains("custom program error") => {
                    return Err(classify_simulation_failure(venue, &reason, &[]));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn submit_bundle_once(
        &self,
        signed: &[Transaction],
        poll_timeout: Duration,
    ) -> Result<String> {
        let bundle_id = self.relay.submit_bundle(signed).await?;
        match self.relay.wait_for_bundle(&bundle_id, poll_timeout).await? {
            BundleOutcome::Landed => Ok(bundle_id),
            BundleOutcome::Dropped => {
                Err(Error::BundleDropped(format!("bundle {} dropped", bundle_id)))
            }
            BundleOutcome::Failed(reason) => Err(Error::Internal(format!(
                "bundle {} failed: {}",
                bundle_id, reason
            ))),
        }
    }

    /// Sign-and-send one at a time, confirming each before the next.
    /// A failure aborts the remainder; the landed prefix is surfaced so
    /// the caller can reconcile through a position re-read.
    async fn submit_sequential(
        &self,
        wallet_id: &str,
        txs: Vec<PreparedTx>,
        aux_signers: &[Keypair],
    ) -> Result<SubmitOutcome> {
        let mut landed = Vec::new();
        let total = txs.len();
        for (index, prepared) in txs.into_iter().enumerate() {
            let aux: Vec<&Keypair> = if prepared.needs_aux {
                aux_signers.iter().collect()
            } else {
                vec![]
            };
            let label = prepared.label.clone();
            let result = async {
                let signed = self
                    .signer
                    .sign(wallet_id, prepared.transaction, &aux)
                    .await?;
                let signature = self.rpc.send_and_confirm_transaction(&signed).await?;
                Ok::<_, Error>(signature.to_string())
            }
            .await;

            match result {
                Ok(signature) => {
                    info!("tx {}/{} ({}) landed: {}", index + 1, total, label, signature);
                    landed.push(signature);
                }
                Err(e) => {
                    warn!("tx {}/{} ({}) failed: {}", index + 1, total, label, e);
                    return Ok(SubmitOutcome {
                        mode: SubmitMode::Sequential,
                        bundle_id: None,
                        landed_txs: landed,
                        failed_at: Some(index),
                        reason: Some(e.to_string()),
                    });
                }
            }

            if index + 1 < total {
                debug!("waiting {:?} for state propagation", SEQUENTIAL_GAP);
                tokio::time::sleep(SEQUENTIAL_GAP).await;
            }
        }

        Ok(SubmitOutcome {
            mode: SubmitMode::Sequential,
            bundle_id: None,
            landed_txs: landed,
            failed_at: None,
            reason: None,
        })
    }

    async fn sign_all(
        &self,
        wallet_id: &str,
        txs: Vec<PreparedTx>,
        aux_signers: &[Keypair],
    ) -> Result<Vec<Transaction>> {
        let mut signed = Vec::with_capacity(txs.len());
        for prepared in txs {
            let aux: Vec<&Keypair> = if prepared.needs_aux {
                aux_signers.iter().collect()
            } else {
                vec![]
            };
            signed.push(
                self.signer
                    .sign(wallet_id, prepared.transaction, &aux)
                    .await?,
            );
        }
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&Error::BundleDropped("x".into())));
        assert!(is_transient(&Error::BundleTimeout(60)));
        assert!(is_transient(&Error::RpcUnavailable("x".into())));
        assert!(!is_transient(&Error::SlippageExceeded { bps: 300 }));
        assert!(!is_transient(&Error::SignRefused("x".into())));
        assert!(!is_transient(&Error::InsufficientFunds("x".into())));
    }

    #[test]
    fn test_outcome_landed() {
        let ok = SubmitOutcome {
            mode: SubmitMode::Bundle,
            bundle_id: Some("b".into()),
            landed_txs: vec!["sig".into()],
            failed_at: None,
            reason: None,
        };
        assert!(ok.landed());

        let partial = SubmitOutcome {
            mode: SubmitMode::Sequential,
            bundle_id: None,
            landed_txs: vec!["sig".into()],
            failed_at: Some(1),
            reason: Some("blockhash expired".into()),
        };
        assert!(!partial.landed());
    }
}
