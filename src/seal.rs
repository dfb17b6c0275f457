//! Strategy sealing
//!
//! Envelope-encrypts strategy parameters before execution: an ephemeral
//! x25519 keypair derives a shared secret with the compute environment's
//! published public key, and the strategy JSON is encrypted under
//! ChaCha20-Poly1305. The sealed envelope rides on execution receipts;
//! the cleartext never leaves this process.

use base64::Engine;
use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::SealConfig;
use crate::error::{Error, Result};
use crate::types::Strategy;

/// Envelope nonce length; the AEAD consumes its first 12 bytes
const NONCE_LEN: usize = 16;

/// Sealed envelope attached to execution receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedStrategy {
    /// Base64 ciphertext (includes the AEAD tag)
    pub ciphertext: String,
    /// Hex, 16 bytes
    pub nonce: String,
    /// Hex, 32 bytes
    pub ephemeral_public_key: String,
    pub cluster_id: String,
}

pub struct StrategySealer {
    environment_public: MontgomeryPoint,
    cluster_id: String,
}

impl StrategySealer {
    /// Build from config. Without a configured environment key a
    /// process-local throwaway key is generated, so receipts stay
    /// sealed either way.
    pub fn new(config: &SealConfig) -> Result<Self> {
        let environment_public = if config.mxe_public_key.is_empty() {
            let (_, public) = generate_keypair();
            info!("No compute-environment key configured; sealing against a process-local key");
            public
        } else {
            let bytes = hex::decode(&config.mxe_public_key)
                .map_err(|e| Error::Config(format!("mxe_public_key: {}", e)))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Config("mxe_public_key must be 32 bytes".into()))?;
            MontgomeryPoint(bytes)
        };
        Ok(Self {
            environment_public,
            cluster_id: config.cluster_id.clone(),
        })
    }

    /// Seal a strategy for the configured environment
    pub fn seal(&self, strategy: &Strategy) -> Result<SealedStrategy> {
        seal_for(&self.environment_public, &self.cluster_id, strategy)
    }

    /// Round-trip self-test run at startup: seal against a throwaway
    /// environment key and decrypt with its secret.
    pub fn self_test(&self) -> Result<()> {
        let (secret, public) = generate_keypair();
        let strategy = Strategy {
            venue: crate::types::Venue::Dlmm,
            pool: "self-test".into(),
            collateral_mint: crate::pools::tokens::WSOL_MINT.into(),
            collateral_amount: 1,
            shape: crate::types::RangeShape::Concentrated,
            distribution: crate::types::Distribution::Spot,
            slippage_bps: 300,
            urgency: crate::types::TipUrgency::Skip,
        };
        let sealed = seal_for(&public, &self.cluster_id, &strategy)?;
        let opened = unseal(&secret, &sealed)?;
        if opened.pool != strategy.pool || opened.collateral_amount != strategy.collateral_amount {
            return Err(Error::Internal("seal round-trip mismatch".into()));
        }
        info!("Strategy sealer self-test passed");
        Ok(())
    }
}

fn generate_keypair() -> ([u8; 32], MontgomeryPoint) {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    let public = MontgomeryPoint::mul_base_clamped(secret);
    (secret, public)
}

fn derive_key(shared: &MontgomeryPoint) -> chacha20poly1305::Key {
    let digest = Sha256::digest(shared.as_bytes());
    *chacha20poly1305::Key::from_slice(&digest)
}

fn seal_for(
    environment: &MontgomeryPoint,
    cluster_id: &str,
    strategy: &Strategy,
) -> Result<SealedStrategy> {
    let (ephemeral_secret, ephemeral_public) = generate_keypair();
    let shared = environment.mul_clamped(ephemeral_secret);
    let cipher = ChaCha20Poly1305::new(&derive_key(&shared));

    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let plaintext = serde_json::to_vec(strategy)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce[..12]), plaintext.as_slice())
        .map_err(|e| Error::Internal(format!("seal encrypt: {}", e)))?;

    Ok(SealedStrategy {
        ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        nonce: hex::encode(nonce),
        ephemeral_public_key: hex::encode(ephemeral_public.as_bytes()),
        cluster_id: cluster_id.to_string(),
    })
}

/// Decrypt with the environment secret; only reachable in tests and the
/// startup self-test, the engine itself never holds that secret.
pub fn unseal(environment_secret: &[u8; 32], sealed: &SealedStrategy) -> Result<Strategy> {
    let eph_bytes: [u8; 32] = hex::decode(&sealed.ephemeral_public_key)
        .map_err(|e| Error::Serialization(format!("ephemeral key hex: {}", e)))?
        .try_into()
        .map_err(|_| Error::Serialization("ephemeral key must be 32 bytes".into()))?;
    let ephemeral_public = MontgomeryPoint(eph_bytes);
    let shared = ephemeral_public.mul_clamped(*environment_secret);
    let cipher = ChaCha20Poly1305::new(&derive_key(&shared));

    let nonce = hex::decode(&sealed.nonce)
        .map_err(|e| Error::Serialization(format!("nonce hex: {}", e)))?;
    if nonce.len() != NONCE_LEN {
        return Err(Error::Serialization("nonce must be 16 bytes".into()));
    }
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|e| Error::Serialization(format!("ciphertext base64: {}", e)))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce[..12]), ciphertext.as_slice())
        .map_err(|_| Error::Internal("seal decrypt failed".into()))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Distribution, RangeShape, TipUrgency, Venue};

    fn strategy() -> Strategy {
        Strategy {
            venue: Venue::Whirlpool,
            pool: "pool-address".into(),
            collateral_mint: crate::pools::tokens::WSOL_MINT.into(),
            collateral_amount: 500_000_000,
            shape: RangeShape::Concentrated,
            distribution: Distribution::Spot,
            slippage_bps: 300,
            urgency: TipUrgency::Fast,
        }
    }

    #[test]
    fn test_seal_roundtrip() {
        let (secret, public) = generate_keypair();
        let sealed = seal_for(&public, "mainnet", &strategy()).unwrap();
        assert_eq!(hex::decode(&sealed.nonce).unwrap().len(), 16);
        assert_eq!(sealed.cluster_id, "mainnet");

        let opened = unseal(&secret, &sealed).unwrap();
        assert_eq!(opened.pool, "pool-address");
        assert_eq!(opened.collateral_amount, 500_000_000);
        assert_eq!(opened.slippage_bps, 300);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let (_, public) = generate_keypair();
        let (other_secret, _) = generate_keypair();
        let sealed = seal_for(&public, "mainnet", &strategy()).unwrap();
        assert!(unseal(&other_secret, &sealed).is_err());
    }

    #[test]
    fn test_nonces_are_unique() {
        let (_, public) = generate_keypair();
        let a = seal_for(&public, "mainnet", &strategy()).unwrap();
        let b = seal_for(&public, "mainnet", &strategy()).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    }

    #[test]
    fn test_self_test_passes() {
        let sealer = StrategySealer::new(&crate::config::SealConfig::default()).unwrap();
        sealer.self_test().unwrap();
    }
}
