//! Wiring and long-running loops of the indexer process.
//!
//! [`IndexerService::build`] connects storage, chain and oracle and assembles the
//! components. [`IndexerService::run`] then drives four tasks until ctrl-c:
//!
//! ```text
//!   scan interval ──► BlockScanner::tick
//!   price interval ─► PriceResolutionEngine::run_cycle
//!   mpsc<ChainLog> ─► BlockScanner::handle_realtime_log
//!   axum server ────► control API
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::{run_server, ServerSettings};
use crate::app_state::AppState;
use crate::config::Config;
use crate::db::{create_pool, Repository, StorageGateway};
use crate::error::IndexerResult;
use crate::indexer::scanner::RealtimeOutcome;
use crate::indexer::{BlockScanner, PoolLifecycleManager, ScannerSettings, TickOutcome};
use crate::oracle::{CoinGeckoOracle, PriceOracleGateway};
use crate::pricing::PriceResolutionEngine;
use crate::rpc::{check_connection, AlloyChainGateway, ChainGateway, ChainLog};

/// Buffered real-time logs before subscription tasks wait on the consumer.
pub const REALTIME_CHANNEL_CAPACITY: usize = 1024;

/// The three external backends.
#[derive(Clone)]
pub struct Gateways {
    /// Chain RPC
    pub chain: Arc<dyn ChainGateway>,
    /// Database
    pub storage: Arc<dyn StorageGateway>,
    /// USD price oracle
    pub oracle: Arc<dyn PriceOracleGateway>,
}

impl Gateways {
    /// Open the database (running migrations), check the RPC node is reachable
    /// and build the oracle client.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened, the node does not answer or a
    /// client cannot be built.
    pub async fn connect(config: &Config) -> IndexerResult<Self> {
        let db = create_pool(config.database_url()).await?;
        let chain = AlloyChainGateway::new(config.rpc_url(), config.ws_url(), config.rpc_timeout())?;
        let head = check_connection(chain.http()).await?;
        info!(head, "Chain RPC reachable");
        let oracle = CoinGeckoOracle::new(
            config.oracle_url(),
            config.oracle_api_key().map(String::from),
            config.rpc_timeout(),
        )?;

        Ok(Self {
            chain: Arc::new(chain),
            storage: Arc::new(Repository::new(db)),
            oracle: Arc::new(oracle),
        })
    }
}

/// Assembled components of a running indexer.
pub struct IndexerService {
    storage: Arc<dyn StorageGateway>,
    pools: Arc<PoolLifecycleManager>,
    scanner: Arc<BlockScanner>,
    engine: Arc<PriceResolutionEngine>,
    realtime: mpsc::Receiver<ChainLog>,
    scan_interval: Duration,
    price_interval: Duration,
    server: ServerSettings,
}

impl IndexerService {
    /// Connect to every backend and build the components. Pools are not loaded
    /// yet; [`Self::run`] does that.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or a client cannot be built.
    pub async fn build(config: &Config) -> IndexerResult<Self> {
        let gateways = Gateways::connect(config).await?;
        Ok(Self::assemble(gateways, config))
    }

    /// Build the components over already-constructed gateways.
    #[must_use]
    pub fn assemble(gateways: Gateways, config: &Config) -> Self {
        let Gateways {
            chain,
            storage,
            oracle,
        } = gateways;
        let (sender, realtime) = mpsc::channel(REALTIME_CHANNEL_CAPACITY);
        let pools = Arc::new(PoolLifecycleManager::new(
            chain.clone(),
            storage.clone(),
            config.factory_address(),
            Some(sender),
        ));
        let scanner = Arc::new(BlockScanner::new(
            chain,
            storage.clone(),
            pools.clone(),
            ScannerSettings::from_config(config),
        ));
        let engine = Arc::new(PriceResolutionEngine::new(storage.clone(), oracle));

        Self {
            storage,
            pools,
            scanner,
            engine,
            realtime,
            scan_interval: config.scan_interval(),
            price_interval: config.price_interval(),
            server: ServerSettings {
                port: config.api_port(),
                rate_limit_rpm: config.api_rate_limit_rpm(),
                cors_origins: config.cors_origins().to_vec(),
            },
        }
    }

    /// Block scanner.
    #[must_use]
    pub fn scanner(&self) -> &Arc<BlockScanner> {
        &self.scanner
    }

    /// Pool lifecycle manager.
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolLifecycleManager> {
        &self.pools
    }

    /// Price resolution engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<PriceResolutionEngine> {
        &self.engine
    }

    /// Storage gateway.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageGateway> {
        &self.storage
    }

    /// Load tracked pools, start every loop and the API, and wait for ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns the storage error if tracked pools cannot be loaded. Errors
    /// inside the loops are logged and retried on the next interval.
    pub async fn run(self) -> IndexerResult<()> {
        let tracked = self.pools.load_tracked().await?;
        info!(
            pools = tracked,
            scan_interval_secs = self.scan_interval.as_secs(),
            price_interval_secs = self.price_interval.as_secs(),
            "Indexer starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks: Vec<JoinHandle<()>> = vec![
            tokio::spawn(scan_loop(
                self.scanner.clone(),
                self.scan_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(price_loop(
                self.engine.clone(),
                self.price_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(realtime_loop(
                self.scanner.clone(),
                self.realtime,
                shutdown_rx.clone(),
            )),
            tokio::spawn(api_task(
                AppState::new(self.scanner.clone(), self.storage.clone()),
                self.server,
                shutdown_rx,
            )),
        ];

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c, shutting down");
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
        self.pools.shutdown().await;
        info!("Shutdown complete");
        Ok(())
    }
}

async fn scan_loop(scanner: Arc<BlockScanner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                match scanner.tick().await {
                    Ok(TickOutcome::Advanced(report)) => info!(
                        from_block = report.from_block,
                        to_block = report.to_block,
                        swaps = report.events.swaps,
                        failures = report.failures.len(),
                        "Batch indexed"
                    ),
                    Ok(outcome) => debug!(?outcome, "Scan tick"),
                    Err(e) => error!(error = %e, "Scan tick failed"),
                }
            }
        }
    }
    debug!("Scan loop stopped");
}

async fn price_loop(
    engine: Arc<PriceResolutionEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                match engine.run_cycle().await {
                    Ok(report) => info!(
                        tokens = report.tokens,
                        priced = report.prices.len(),
                        unpriced = report.unpriced.len(),
                        oracle_backoff = report.oracle_backoff,
                        "Price cycle complete"
                    ),
                    Err(e) => error!(error = %e, "Price cycle failed"),
                }
            }
        }
    }
    debug!("Price loop stopped");
}

async fn realtime_loop(
    scanner: Arc<BlockScanner>,
    mut logs: mpsc::Receiver<ChainLog>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let log = tokio::select! {
            _ = shutdown.changed() => break,
            next = logs.recv() => match next {
                Some(log) => log,
                None => break,
            },
        };

        let (block, address) = (log.block_number, log.address);
        match scanner.handle_realtime_log(log).await {
            Ok(RealtimeOutcome::Dropped) => {
                debug!(block, address = %address, "Real-time log dropped, batch scan will cover it");
            }
            Ok(outcome) => debug!(block, address = %address, ?outcome, "Real-time log handled"),
            Err(e) => warn!(block, address = %address, error = %e, "Real-time log failed"),
        }
    }
    debug!("Real-time consumer stopped");
}

async fn api_task(state: AppState, settings: ServerSettings, shutdown: watch::Receiver<bool>) {
    if let Err(e) = run_server(state, settings, shutdown).await {
        error!(error = %e, "API server exited");
    }
}
