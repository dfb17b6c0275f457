//! Long-lived application context
//!
//! Every shared client lives here, constructed once at startup and
//! passed explicitly. No ambient singletons.

use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::notify::NotificationRouter;
use crate::oracle::OracleAggregator;
use crate::pipeline::swap::SwapClient;
use crate::pools::PoolAggregator;
use crate::positions::PositionIndexer;
use crate::seal::StrategySealer;
use crate::store::Store;
use crate::submit::relay::RelayClient;
use crate::submit::SubmissionDriver;
use crate::venue::AdapterSet;
use crate::wallet::{SignerClient, WalletLocks, WalletRegistry};

pub struct AppContext {
    pub config: Config,
    pub rpc: Arc<RpcClient>,
    pub store: Store,
    pub adapters: Arc<AdapterSet>,
    pub pools: PoolAggregator,
    pub oracle: OracleAggregator,
    pub swap: SwapClient,
    pub relay: Arc<RelayClient>,
    pub signer: Arc<SignerClient>,
    pub wallets: WalletRegistry,
    pub driver: SubmissionDriver,
    pub indexer: PositionIndexer,
    pub notifier: NotificationRouter,
    pub sealer: StrategySealer,
    pub locks: WalletLocks,
}

impl AppContext {
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let rpc = Arc::new(RpcClient::new_with_timeout(
            config.rpc.endpoint.clone(),
            Duration::from_millis(config.rpc.timeout_ms),
        ));

        let store = Store::connect(&config.store).await?;
        let adapters = Arc::new(AdapterSet::new(&config.venues, rpc.clone())?);
        let pools = PoolAggregator::new(
            adapters.clone(),
            Duration::from_secs(config.venues.pool_cache_secs),
        );
        let oracle = OracleAggregator::new(config.oracle.clone())?;
        let swap = SwapClient::new(&config.swap)?;
        let relay = Arc::new(RelayClient::new(config.relay.clone())?);
        let signer = Arc::new(SignerClient::new(&config.signer)?);
        let wallets = WalletRegistry::new(store.clone(), signer.clone(), rpc.clone());
        let driver = SubmissionDriver::new(relay.clone(), signer.clone(), rpc.clone());
        let indexer = PositionIndexer::new(adapters.clone());
        let notifier = NotificationRouter::new(config.notify.clone(), store.clone())?;

        let sealer = StrategySealer::new(&config.seal)?;
        sealer.self_test()?;

        info!("Context initialized ({} venues enabled)", adapters.enabled().len());

        Ok(Arc::new(Self {
            config,
            rpc,
            store,
            adapters,
            pools,
            oracle,
            swap,
            relay,
            signer,
            wallets,
            driver,
            indexer,
            notifier,
            sealer,
            locks: WalletLocks::new(),
        }))
    }
}
