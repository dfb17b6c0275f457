//! Wallet registry and custody oracle client
//!
//! Key material never enters this process. The custody oracle turns
//! unsigned transaction bytes into signed ones (idempotent per wallet
//! and transaction hash); the registry only maps wallet ids to public
//! addresses.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info};

use crate::config::SignerConfig;
use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::UserProfile;

/// Custody oracle HTTP client
pub struct SignerClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    wallet_id: &'a str,
    transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignAndSendResponse {
    signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletRequest<'a> {
    label: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletResponse {
    wallet_id: String,
    address: String,
}

impl SignerClient {
    pub fn new(config: &SignerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Sign a transaction with the wallet's key. Auxiliary keypairs
    /// (fresh position accounts) partial-sign locally first; the oracle
    /// only ever adds the wallet signature.
    pub async fn sign(
        &self,
        wallet_id: &str,
        mut transaction: Transaction,
        aux_signers: &[&Keypair],
    ) -> Result<Transaction> {
        if !aux_signers.is_empty() {
            let blockhash = transaction.message.recent_blockhash;
            transaction.partial_sign(aux_signers, blockhash);
        }

        let bytes = bincode::serialize(&transaction)
            .map_err(|e| Error::Serialization(format!("sign request: {}", e)))?;
        let request = SignRequest {
            wallet_id,
            transaction: base64::engine::general_purpose::STANDARD.encode(bytes),
        };

        let url = format!("{}/sign", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::SignRefused(format!(
                "custody oracle returned {}",
                response.status()
            )));
        }
        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle response: {}", e)))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&signed.transaction)
            .map_err(|e| Error::Serialization(format!("signed tx base64: {}", e)))?;
        bincode::deserialize(&bytes)
            .map_err(|e| Error::Serialization(format!("signed tx decode: {}", e)))
    }

    /// Sign and submit in one step on the oracle side
    pub async fn sign_and_send(&self, wallet_id: &str, transaction: &Transaction) -> Result<String> {
        let bytes = bincode::serialize(transaction)
            .map_err(|e| Error::Serialization(format!("sign request: {}", e)))?;
        let request = SignRequest {
            wallet_id,
            transaction: base64::engine::general_purpose::STANDARD.encode(bytes),
        };

        let url = format!("{}/sign-and-send", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::SignRefused(format!(
                "custody oracle returned {}",
                response.status()
            )));
        }
        let sent: SignAndSendResponse = response
            .json()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle response: {}", e)))?;
        Ok(sent.signature)
    }

    /// Provision a new wallet at the custody oracle
    pub async fn create_wallet(&self, label: Option<&str>) -> Result<(String, String)> {
        let url = format!("{}/wallets", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&CreateWalletRequest { label })
            .send()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::SignRefused(format!(
                "custody oracle returned {}",
                response.status()
            )));
        }
        let created: CreateWalletResponse = response
            .json()
            .await
            .map_err(|e| Error::SignRefused(format!("custody oracle response: {}", e)))?;
        Ok((created.wallet_id, created.address))
    }
}

/// Wallet-id to address registry, persisted in the store
pub struct WalletRegistry {
    store: Store,
    signer: Arc<SignerClient>,
    rpc: Arc<RpcClient>,
}

impl WalletRegistry {
    pub fn new(store: Store, signer: Arc<SignerClient>, rpc: Arc<RpcClient>) -> Self {
        Self { store, signer, rpc }
    }

    pub async fn create(&self, label: Option<&str>) -> Result<UserProfile> {
        let (wallet_id, address) = self.signer.create_wallet(label).await?;
        let profile = UserProfile {
            wallet_id: wallet_id.clone(),
            address,
            created_at: Utc::now(),
            label: label.map(str::to_string),
        };
        self.store.set(&keys::user(&wallet_id), &profile).await?;
        info!("Provisioned wallet {}", wallet_id);
        Ok(profile)
    }

    pub async fn load(&self, wallet_id: &str) -> Result<UserProfile> {
        self.store
            .get(&keys::user(wallet_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))
    }

    /// Lamport balance of the wallet's address
    pub async fn balance(&self, wallet_id: &str) -> Result<u64> {
        let profile = self.load(wallet_id).await?;
        let address = Pubkey::from_str(&profile.address)
            .map_err(|e| Error::Internal(format!("stored address invalid: {}", e)))?;
        Ok(self.rpc.get_balance(&address).await?)
    }
}

/// In-process advisory lock serializing LP-mutating intents per wallet.
/// A second request on a locked wallet fails fast instead of queueing.
#[derive(Clone, Default)]
pub struct WalletLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, wallet_id: &str) -> Result<WalletLockGuard> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(wallet_id.to_string()) {
            return Err(Error::WalletBusy(format!(
                "an execution for {} is already in flight",
                wallet_id
            )));
        }
        debug!("wallet lock acquired for {}", wallet_id);
        Ok(WalletLockGuard {
            held: self.held.clone(),
            wallet_id: wallet_id.to_string(),
        })
    }
}

pub struct WalletLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    wallet_id: String,
}

impl Drop for WalletLockGuard {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.wallet_id);
        debug!("wallet lock released for {}", self.wallet_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_per_wallet() {
        let locks = WalletLocks::new();
        let guard = locks.try_acquire("w1").unwrap();
        assert!(matches!(
            locks.try_acquire("w1"),
            Err(Error::WalletBusy(_))
        ));
        // Other wallets are unaffected
        let _other = locks.try_acquire("w2").unwrap();
        drop(guard);
        assert!(locks.try_acquire("w1").is_ok());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = WalletLocks::new();
        {
            let _guard = locks.try_acquire("w1").unwrap();
        }
        assert!(locks.try_acquire("w1").is_ok());
    }
}
