//! Pool lifecycle: creation, manual add/remove and live subscriptions.
//!
//! [`PoolLifecycleManager`] owns the set of tracked pool addresses. Each
//! tracked pool may hold a [`SubscriptionHandle`] whose task forwards pushed
//! logs into the shared real-time channel; dropping the handle stops the feed.
//! A stream that ends is renewed with jittered exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::db::models::{NewPool, PoolInsertOutcome};
use crate::db::StorageGateway;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{decode_log, DecodedEvent, PoolCreated, PoolCreatedEvent, POOL_EVENT_SIGNATURES};
use crate::rpc::gateway::{ChainGateway, ChainLog, LogQuery, LogStream};
use crate::rpc::websocket::next_delay;

/// Tick stored for manually added pools.
///
/// Manual adds only read `token0`, `token1`, `fee` and `liquidity`, so the
/// real tick stays unknown until the first swap overwrites this value.
pub const PLACEHOLDER_TICK: i32 = 0;

/// Delays between attempts to renew a subscription whose stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribeBackoff {
    /// Wait before the first attempt
    pub initial: Duration,
    /// Cap on the doubled delay
    pub max: Duration,
}

impl Default for ResubscribeBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// What a [`SubscriptionHandle`] needs to open a fresh stream.
pub struct Resubscribe {
    /// Node the subscription is opened against
    pub chain: Arc<dyn ChainGateway>,
    /// Filter of the original subscription
    pub query: LogQuery,
    /// Retry delays
    pub backoff: ResubscribeBackoff,
}

impl std::fmt::Debug for Resubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resubscribe")
            .field("query", &self.query)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Resubscribe {
    /// Retry until a stream opens. `None` once nobody listens on `sink`.
    async fn next_stream(&self, label: &str, sink: &mpsc::Sender<ChainLog>) -> Option<LogStream> {
        let mut delay = self.backoff.initial;
        let mut attempt = 0_u32;
        loop {
            tokio::time::sleep(delay).await;
            if sink.is_closed() {
                debug!(subscription = label, "Real-time channel closed");
                return None;
            }
            attempt += 1;
            match self.chain.subscribe_logs(&self.query).await {
                Ok(stream) => {
                    info!(subscription = label, attempt, "Resubscribed to logs");
                    return Some(stream);
                }
                Err(e) => {
                    delay = next_delay(delay, self.backoff.max);
                    warn!(
                        subscription = label,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Resubscribe failed"
                    );
                }
            }
        }
    }
}

/// Handle to a running log subscription. Cancelling or dropping it aborts the
/// forwarding task.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Forward every log of `stream` into `sink` until the sink closes.
    ///
    /// When the stream ends, `renewal` opens a new one; without it the task
    /// stops there.
    #[must_use]
    pub fn spawn(
        label: String,
        mut stream: LogStream,
        renewal: Option<Resubscribe>,
        sink: mpsc::Sender<ChainLog>,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                while let Some(log) = stream.next().await {
                    if sink.send(log).await.is_err() {
                        debug!(subscription = %label, "Real-time channel closed");
                        return;
                    }
                }

                let Some(renewal) = &renewal else {
                    warn!(subscription = %label, "Log subscription ended");
                    return;
                };
                warn!(subscription = %label, "Log subscription ended, resubscribing");
                match renewal.next_stream(&label, &sink).await {
                    Some(next) => stream = next,
                    None => return,
                }
            }
        });
        Self { task }
    }

    /// Stop the subscription.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the forwarding task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Result of a manual pool add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddPoolOutcome {
    /// Pool row created and tracked
    Added,
    /// Previously removed pool switched back on
    Reactivated,
    /// Pool was already tracked; nothing changed
    AlreadyTracked,
}

/// Pools created by one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Pools created or reactivated
    pub created: usize,
    /// Events skipped (missing token, duplicate, undecodable)
    pub skipped: usize,
}

/// Tracks the live pool set and keeps it in sync with storage.
pub struct PoolLifecycleManager {
    chain: Arc<dyn ChainGateway>,
    storage: Arc<dyn StorageGateway>,
    factory: Address,
    tracked: Mutex<HashMap<Address, Option<SubscriptionHandle>>>,
    factory_subscription: Mutex<Option<SubscriptionHandle>>,
    realtime: Option<mpsc::Sender<ChainLog>>,
    resubscribe: ResubscribeBackoff,
}

impl std::fmt::Debug for PoolLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLifecycleManager")
            .field("factory", &self.factory)
            .field("realtime", &self.realtime.is_some())
            .finish_non_exhaustive()
    }
}

impl PoolLifecycleManager {
    /// Creates a manager. With `realtime` set, tracked pools are subscribed
    /// and their logs forwarded into that channel.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        storage: Arc<dyn StorageGateway>,
        factory: Address,
        realtime: Option<mpsc::Sender<ChainLog>>,
    ) -> Self {
        Self {
            chain,
            storage,
            factory,
            tracked: Mutex::new(HashMap::new()),
            factory_subscription: Mutex::new(None),
            realtime,
            resubscribe: ResubscribeBackoff::default(),
        }
    }

    /// Delays used to renew subscriptions whose stream ended.
    #[must_use]
    pub fn with_resubscribe_backoff(mut self, backoff: ResubscribeBackoff) -> Self {
        self.resubscribe = backoff;
        self
    }

    /// Factory contract address.
    #[must_use]
    pub const fn factory(&self) -> Address {
        self.factory
    }

    /// Load active pools from storage and subscribe to them and the factory.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the pool list cannot be read.
    pub async fn load_tracked(&self) -> IndexerResult<usize> {
        let pools = self.storage.list_active_pools().await?;
        for pool in &pools {
            match pool.address() {
                Ok(address) => self.track(address).await,
                Err(e) => warn!(pool = %pool.address, error = %e, "Skipping malformed pool row"),
            }
        }

        if let Some(sink) = &self.realtime {
            let query = LogQuery {
                addresses: vec![self.factory],
                event_signatures: vec![PoolCreated::SIGNATURE_HASH],
                ..LogQuery::default()
            };
            let handle = self.subscribe("factory", &query, sink.clone()).await;
            *self.factory_subscription.lock().await = handle;
        }

        let count = self.tracked.lock().await.len();
        info!(pools = count, "Tracked pools loaded");
        Ok(count)
    }

    /// Tracked pool addresses, sorted.
    pub async fn tracked_pools(&self) -> Vec<Address> {
        let mut pools: Vec<Address> = self.tracked.lock().await.keys().copied().collect();
        pools.sort_unstable();
        pools
    }

    /// Whether `pool` is tracked.
    pub async fn is_tracked(&self, pool: &Address) -> bool {
        self.tracked.lock().await.contains_key(pool)
    }

    /// Addresses whose subscription is live.
    pub async fn subscribed_pools(&self) -> Vec<Address> {
        self.tracked
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| handle.as_ref().is_some_and(|h| !h.is_finished()))
            .map(|(address, _)| *address)
            .collect()
    }

    /// Create pools from factory `PoolCreated` logs in `[from, to]`.
    ///
    /// # Errors
    ///
    /// RPC and storage failures abort the discovery.
    #[instrument(skip(self))]
    pub async fn discover_new_pools(&self, from: u64, to: u64) -> IndexerResult<DiscoveryReport> {
        let query = LogQuery::range(
            from,
            to,
            vec![self.factory],
            vec![PoolCreated::SIGNATURE_HASH],
        );
        let mut logs = self.chain.get_logs(&query).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut report = DiscoveryReport::default();
        for log in &logs {
            let event = match decode_log(log) {
                Ok(DecodedEvent::PoolCreated(event)) => event,
                Ok(_) => continue,
                Err(e) => {
                    warn!(tx = %log.transaction_hash, error = %e, "Skipping undecodable factory log");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.handle_pool_created(&event, log.block_number).await? {
                PoolInsertOutcome::Created | PoolInsertOutcome::Reactivated => report.created += 1,
                PoolInsertOutcome::AlreadyExists | PoolInsertOutcome::MissingToken => {
                    report.skipped += 1;
                }
            }
        }

        if report.created > 0 {
            info!(created = report.created, skipped = report.skipped, "New pools discovered");
        }
        Ok(report)
    }

    /// Create and track a pool from a factory event.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub async fn handle_pool_created(
        &self,
        event: &PoolCreatedEvent,
        block: u64,
    ) -> IndexerResult<PoolInsertOutcome> {
        let outcome = self
            .storage
            .insert_pool(&NewPool {
                address: event.pool,
                token0: event.token0,
                token1: event.token1,
                fee: event.fee,
                tick_spacing: Some(event.tick_spacing),
                sqrt_price_x96: None,
                liquidity: 0,
                tick: None,
                created_block: Some(block),
            })
            .await?;

        match outcome {
            PoolInsertOutcome::Created | PoolInsertOutcome::Reactivated => {
                info!(pool = %event.pool, fee = event.fee, block, "Pool created");
                self.track(event.pool).await;
            }
            PoolInsertOutcome::AlreadyExists => {
                debug!(pool = %event.pool, "Pool already exists");
                self.track(event.pool).await;
            }
            PoolInsertOutcome::MissingToken => {
                warn!(
                    pool = %event.pool,
                    token0 = %event.token0,
                    token1 = %event.token1,
                    "Skipping pool: token not seeded"
                );
            }
        }
        Ok(outcome)
    }

    /// Read a pool from chain and start tracking it.
    ///
    /// The stored tick is [`PLACEHOLDER_TICK`] and the price is unknown until
    /// the first indexed swap.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the contract cannot be read and a validation
    /// error if either token is not seeded.
    #[instrument(skip(self))]
    pub async fn add_pool_manually(&self, address: Address) -> IndexerResult<AddPoolOutcome> {
        if self.is_tracked(&address).await {
            return Ok(AddPoolOutcome::AlreadyTracked);
        }

        let on_chain = self.chain.read_pool(address).await?;
        let outcome = self
            .storage
            .insert_pool(&NewPool {
                address,
                token0: on_chain.token0,
                token1: on_chain.token1,
                fee: on_chain.fee,
                tick_spacing: None,
                sqrt_price_x96: None,
                liquidity: on_chain.liquidity,
                tick: Some(PLACEHOLDER_TICK),
                created_block: None,
            })
            .await?;

        let result = match outcome {
            PoolInsertOutcome::Created => AddPoolOutcome::Added,
            PoolInsertOutcome::Reactivated => AddPoolOutcome::Reactivated,
            PoolInsertOutcome::AlreadyExists => AddPoolOutcome::AlreadyTracked,
            PoolInsertOutcome::MissingToken => {
                return Err(IndexerError::validation(format!(
                    "Pool {address} references a token that is not seeded ({} / {})",
                    on_chain.token0, on_chain.token1
                )));
            }
        };

        self.track(address).await;
        info!(pool = %address, outcome = ?result, "Pool added manually");
        Ok(result)
    }

    /// Deactivate a pool and stop its subscription.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::NotFound`] if the pool is neither tracked nor
    /// active in storage.
    #[instrument(skip(self))]
    pub async fn remove_pool(&self, address: Address) -> IndexerResult<()> {
        let deactivated = self.storage.deactivate_pool(&address).await?;
        let handle = self.tracked.lock().await.remove(&address);
        let was_tracked = handle.is_some();
        if let Some(Some(handle)) = handle {
            handle.cancel();
        }

        if !deactivated && !was_tracked {
            return Err(IndexerError::not_found(format!("Pool {address} is not tracked")));
        }
        info!(pool = %address, "Pool removed");
        Ok(())
    }

    /// Drop pools that no longer exist in storage, e.g. after a rollback.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the pool list cannot be read.
    pub async fn reconcile(&self) -> IndexerResult<()> {
        let active: Vec<Address> = self
            .storage
            .list_active_pools()
            .await?
            .iter()
            .filter_map(|pool| pool.address().ok())
            .collect();
        self.tracked
            .lock()
            .await
            .retain(|address, _| active.contains(address));
        Ok(())
    }

    /// Cancel every subscription.
    pub async fn shutdown(&self) {
        self.tracked.lock().await.clear();
        self.factory_subscription.lock().await.take();
    }

    async fn track(&self, address: Address) {
        if self.is_tracked(&address).await {
            return;
        }

        let handle = match &self.realtime {
            Some(sink) => {
                let query = LogQuery {
                    addresses: vec![address],
                    event_signatures: POOL_EVENT_SIGNATURES.to_vec(),
                    ..LogQuery::default()
                };
                self.subscribe(&address.to_string(), &query, sink.clone()).await
            }
            None => None,
        };
        self.tracked.lock().await.entry(address).or_insert(handle);
    }

    async fn subscribe(
        &self,
        label: &str,
        query: &LogQuery,
        sink: mpsc::Sender<ChainLog>,
    ) -> Option<SubscriptionHandle> {
        if !self.chain.supports_subscriptions() {
            return None;
        }
        match self.chain.subscribe_logs(query).await {
            Ok(stream) => {
                debug!(subscription = label, "Subscribed to logs");
                let renewal = Resubscribe {
                    chain: self.chain.clone(),
                    query: query.clone(),
                    backoff: self.resubscribe,
                };
                Some(SubscriptionHandle::spawn(label.to_string(), stream, Some(renewal), sink))
            }
            Err(e) => {
                warn!(subscription = label, error = %e, "Subscription failed; relying on batch scans");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::gateway::{BlockHeader, OnChainPool, ReceiptSummary};
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Node whose subscriptions each deliver one log and then end. The first
    /// `failures` attempts are rejected.
    #[derive(Default)]
    struct ShortLivedSubscriptions {
        opened: AtomicU64,
        failures: AtomicU64,
    }

    #[async_trait]
    impl ChainGateway for ShortLivedSubscriptions {
        async fn block_number(&self) -> IndexerResult<u64> {
            Ok(0)
        }
        async fn get_logs(&self, _: &LogQuery) -> IndexerResult<Vec<ChainLog>> {
            Ok(vec![])
        }
        async fn get_block(&self, _: u64) -> IndexerResult<Option<BlockHeader>> {
            Ok(None)
        }
        async fn get_transaction_receipt(&self, _: B256) -> IndexerResult<Option<ReceiptSummary>> {
            Ok(None)
        }
        async fn read_pool(&self, _: Address) -> IndexerResult<OnChainPool> {
            Err(IndexerError::rpc("unsupported", None))
        }
        async fn subscribe_logs(&self, _: &LogQuery) -> IndexerResult<LogStream> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(IndexerError::rpc("connection refused", None));
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(stream::iter(vec![log(100 + n)]).boxed())
        }
        fn supports_subscriptions(&self) -> bool {
            true
        }
    }

    fn fast_backoff() -> ResubscribeBackoff {
        ResubscribeBackoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    fn log(n: u64) -> ChainLog {
        ChainLog {
            address: Address::ZERO,
            topics: vec![],
            data: alloy::primitives::Bytes::new(),
            block_number: n,
            block_hash: None,
            transaction_hash: alloy::primitives::B256::ZERO,
            log_index: 0,
            removed: false,
        }
    }

    #[tokio::test]
    async fn test_subscription_forwards_logs() {
        let (tx, mut rx) = mpsc::channel(8);
        let stream = stream::iter(vec![log(1), log(2)]).boxed();
        let handle = SubscriptionHandle::spawn("test".into(), stream, None, tx);

        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(1));
        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(2));
        drop(handle);
    }

    #[tokio::test]
    async fn test_ended_stream_is_renewed() {
        let chain = Arc::new(ShortLivedSubscriptions::default());
        chain.failures.store(2, Ordering::SeqCst);
        let renewal = Resubscribe {
            chain: chain.clone(),
            query: LogQuery::default(),
            backoff: fast_backoff(),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let original = stream::iter(vec![log(1)]).boxed();
        let handle = SubscriptionHandle::spawn("renewing".into(), original, Some(renewal), tx);

        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(1));
        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(100));
        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(101));
        assert!(!handle.is_finished());
        assert_eq!(chain.failures.load(Ordering::SeqCst), 0);
        drop(handle);
    }

    #[tokio::test]
    async fn test_ended_stream_without_renewal_stops() {
        let (tx, mut rx) = mpsc::channel(8);
        let _handle = SubscriptionHandle::spawn("once".into(), stream::iter(vec![log(7)]).boxed(), None, tx);

        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(7));
        // The task returned and dropped its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_manager_subscriptions_survive_stream_end() {
        let chain = Arc::new(ShortLivedSubscriptions::default());
        let storage = Arc::new(crate::db::Repository::new(
            crate::db::create_pool("sqlite::memory:").await.expect("db"),
        ));
        let (tx, mut rx) = mpsc::channel(8);
        let manager = PoolLifecycleManager::new(chain.clone(), storage, Address::ZERO, Some(tx))
            .with_resubscribe_backoff(fast_backoff());

        manager.load_tracked().await.expect("load");

        // Factory subscription: first stream, then renewals.
        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(100));
        assert_eq!(rx.recv().await.map(|l| l.block_number), Some(101));
        assert!(chain.opened.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_forwarding() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle =
            SubscriptionHandle::spawn("pending".into(), stream::pending::<ChainLog>().boxed(), None, tx);
        assert!(!handle.is_finished());

        drop(handle);
        // The sender is owned by the aborted task, so the channel closes.
        assert!(rx.recv().await.is_none());
    }
}
