//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub swap: SwapConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub seal: SealConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL; unreachable store falls back to memory
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_true")]
    pub allow_memory_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            allow_memory_fallback: true,
        }
    }
}

/// Per-venue REST index endpoints and enable flags
#[derive(Debug, Clone, Deserialize)]
pub struct VenuesConfig {
    #[serde(default = "default_true")]
    pub dlmm_enabled: bool,
    #[serde(default = "default_dlmm_api")]
    pub dlmm_api: String,
    #[serde(default = "default_true")]
    pub whirlpool_enabled: bool,
    #[serde(default = "default_whirlpool_api")]
    pub whirlpool_api: String,
    #[serde(default = "default_true")]
    pub clmm_enabled: bool,
    #[serde(default = "default_clmm_api")]
    pub clmm_api: String,
    #[serde(default = "default_venue_timeout_secs")]
    pub timeout_secs: u64,
    /// Pool list cache TTL
    #[serde(default = "default_pool_cache_secs")]
    pub pool_cache_secs: u64,
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            dlmm_enabled: true,
            dlmm_api: default_dlmm_api(),
            whirlpool_enabled: true,
            whirlpool_api: default_whirlpool_api(),
            clmm_enabled: true,
            clmm_api: default_clmm_api(),
            timeout_secs: default_venue_timeout_secs(),
            pool_cache_secs: default_pool_cache_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_pyth_endpoint")]
    pub pyth_endpoint: String,
    #[serde(default = "default_jupiter_price_endpoint")]
    pub jupiter_endpoint: String,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// A reading older than this is stale
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
    /// Max pairwise divergence before the aggregate is unreliable, in bps
    #[serde(default = "default_divergence_bps")]
    pub max_divergence_bps: u32,
    #[serde(default = "default_price_cache_secs")]
    pub cache_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            pyth_endpoint: default_pyth_endpoint(),
            jupiter_endpoint: default_jupiter_price_endpoint(),
            timeout_secs: default_oracle_timeout_secs(),
            stale_secs: default_stale_secs(),
            max_divergence_bps: default_divergence_bps(),
            cache_secs: default_price_cache_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    #[serde(default = "default_swap_endpoint")]
    pub router_endpoint: String,
    #[serde(default = "default_swap_timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// How long the circuit stays open
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            router_endpoint: default_swap_endpoint(),
            timeout_secs: default_swap_timeout_secs(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_block_engine_url")]
    pub block_engine_url: String,
    #[serde(default = "default_bundle_timeout_secs")]
    pub bundle_timeout_secs: u64,
    #[serde(default = "default_bundle_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// Tip lamports for FAST urgency
    #[serde(default = "default_tip_fast")]
    pub tip_fast_lamports: u64,
    /// Tip lamports for TURBO urgency
    #[serde(default = "default_tip_turbo")]
    pub tip_turbo_lamports: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            block_engine_url: default_block_engine_url(),
            bundle_timeout_secs: default_bundle_timeout_secs(),
            max_retries: default_bundle_retries(),
            retry_base_secs: default_retry_base_secs(),
            tip_fast_lamports: default_tip_fast(),
            tip_turbo_lamports: default_tip_turbo(),
        }
    }
}

/// Custody oracle endpoint. The engine only ever exchanges transaction
/// bytes with it; key material never crosses this boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_signer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_signer_endpoint(),
            timeout_secs: default_signer_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    /// Protocol fee on withdrawn notional, in bps
    #[serde(default = "default_protocol_fee_bps")]
    pub protocol_fee_bps: u16,
    #[serde(default = "default_treasury")]
    pub treasury: String,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            protocol_fee_bps: default_protocol_fee_bps(),
            treasury: default_treasury(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Ring buffer size for durable worker logs
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            log_capacity: default_log_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default = "default_notify_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_notify_base_secs")]
    pub retry_base_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            max_attempts: default_notify_attempts(),
            retry_base_secs: default_notify_base_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Strategy sealing against the compute environment's public key
#[derive(Debug, Clone, Deserialize)]
pub struct SealConfig {
    /// Hex-encoded x25519 public key of the compute environment
    #[serde(default)]
    pub mxe_public_key: String,
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            mxe_public_key: String::new(),
            cluster_id: default_cluster_id(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_rpc_timeout_ms() -> u64 {
    30000
}

fn default_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into())
}

fn default_dlmm_api() -> String {
    "https://dlmm-api.meteora.ag".into()
}

fn default_whirlpool_api() -> String {
    "https://api.mainnet.orca.so".into()
}

fn default_clmm_api() -> String {
    "https://api-v3.raydium.io".into()
}

fn default_venue_timeout_secs() -> u64 {
    30
}

fn default_pool_cache_secs() -> u64 {
    60
}

fn default_pyth_endpoint() -> String {
    "https://hermes.pyth.network".into()
}

fn default_jupiter_price_endpoint() -> String {
    "https://lite-api.jup.ag/price/v2".into()
}

fn default_oracle_timeout_secs() -> u64 {
    5
}

fn default_stale_secs() -> u64 {
    30
}

fn default_divergence_bps() -> u32 {
    50
}

fn default_price_cache_secs() -> u64 {
    10
}

fn default_swap_endpoint() -> String {
    "https://quote-api.jup.ag/v6".into()
}

fn default_swap_timeout_secs() -> u64 {
    15
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_block_engine_url() -> String {
    std::env::var("BLOCK_ENGINE_URL")
        .unwrap_or_else(|_| "https://ny.mainnet.block-engine.jito.wtf".into())
}

fn default_bundle_timeout_secs() -> u64 {
    60
}

fn default_bundle_retries() -> u32 {
    2
}

fn default_retry_base_secs() -> u64 {
    2
}

fn default_tip_fast() -> u64 {
    100_000
}

fn default_tip_turbo() -> u64 {
    1_000_000
}

fn default_signer_endpoint() -> String {
    std::env::var("SIGNER_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:7700".into())
}

fn default_signer_timeout_secs() -> u64 {
    30
}

fn default_protocol_fee_bps() -> u16 {
    100
}

fn default_treasury() -> String {
    "3Lp6vYyXcVrvYW2NGzPmoLqCvJnyHbiC25N9nWMQCAKU".into()
}

fn default_check_interval_secs() -> u64 {
    300
}

fn default_log_capacity() -> usize {
    500
}

fn default_notify_attempts() -> u32 {
    3
}

fn default_notify_base_secs() -> u64 {
    1
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}

fn default_cluster_id() -> String {
    "mainnet".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix LP__)
            .add_source(
                config::Environment::with_prefix("LP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.fees.protocol_fee_bps > 1000 {
            anyhow::bail!(
                "protocol_fee_bps cannot exceed 1000 (10%), got {}",
                self.fees.protocol_fee_bps
            );
        }

        if self.monitor.check_interval_secs < 10 {
            anyhow::bail!("check_interval_secs must be at least 10");
        }

        if self.oracle.max_divergence_bps == 0 {
            anyhow::bail!("max_divergence_bps must be positive");
        }

        if self.relay.tip_turbo_lamports < self.relay.tip_fast_lamports {
            anyhow::bail!("tip_turbo_lamports must be >= tip_fast_lamports");
        }

        if !self.seal.mxe_public_key.is_empty() {
            let bytes = hex::decode(&self.seal.mxe_public_key)
                .context("seal.mxe_public_key must be hex")?;
            if bytes.len() != 32 {
                anyhow::bail!("seal.mxe_public_key must decode to 32 bytes");
            }
        }

        if !self.venues.dlmm_enabled && !self.venues.whirlpool_enabled && !self.venues.clmm_enabled
        {
            anyhow::bail!("at least one venue must be enabled");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Store:
    redis: {}
    memory_fallback: {}
  Venues:
    dlmm: {} ({})
    whirlpool: {} ({})
    clmm: {} ({})
  Oracle:
    stale_after: {}s
    max_divergence: {}bps
  Swap:
    router: {}
    breaker: {} failures / {}s cooldown
  Relay:
    block_engine: {}
    tips: fast={} turbo={}
  Signer:
    endpoint: {}
  Fees:
    protocol: {}bps -> {}
  Monitor:
    interval: {}s
  Notify:
    telegram_token: {}
  Server:
    bind: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            mask_url(&self.store.redis_url),
            self.store.allow_memory_fallback,
            self.venues.dlmm_enabled,
            self.venues.dlmm_api,
            self.venues.whirlpool_enabled,
            self.venues.whirlpool_api,
            self.venues.clmm_enabled,
            self.venues.clmm_api,
            self.oracle.stale_secs,
            self.oracle.max_divergence_bps,
            self.swap.router_endpoint,
            self.swap.breaker_threshold,
            self.swap.breaker_cooldown_secs,
            mask_url(&self.relay.block_engine_url),
            self.relay.tip_fast_lamports,
            self.relay.tip_turbo_lamports,
            mask_url(&self.signer.endpoint),
            self.fees.protocol_fee_bps,
            self.fees.treasury,
            self.monitor.check_interval_secs,
            if self.notify.telegram_bot_token.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.server.bind_address,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            store: StoreConfig::default(),
            venues: VenuesConfig::default(),
            oracle: OracleConfig::default(),
            swap: SwapConfig::default(),
            relay: RelayConfig::default(),
            signer: SignerConfig::default(),
            fees: FeeConfig::default(),
            monitor: MonitorConfig::default(),
            notify: NotifyConfig::default(),
            server: ServerConfig::default(),
            seal: SealConfig::default(),
        }
    }
}

/// Mask URL for display (hide API keys in query params and userinfo)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fees.protocol_fee_bps, 100);
        assert_eq!(config.oracle.max_divergence_bps, 50);
        assert_eq!(config.monitor.check_interval_secs, 300);
        assert_eq!(config.monitor.log_capacity, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_excessive_fee() {
        let mut config = Config::default();
        config.fees.protocol_fee_bps = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mxe_key() {
        let mut config = Config::default();
        config.seal.mxe_public_key = "nothex".into();
        assert!(config.validate().is_err());
        config.seal.mxe_public_key = "ab".repeat(32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://rpc.example.com?api-key=secret"),
            "https://rpc.example.com?***"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }
}
