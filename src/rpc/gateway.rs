//! Chain access contract used by the indexing pipeline.
//!
//! [`ChainGateway`] is the only way the pipeline reaches the node. The
//! production implementation, [`AlloyChainGateway`], answers queries over
//! HTTP and serves subscriptions over a lazily connected WebSocket. Every
//! call is bounded by the configured RPC timeout.

use std::future::IntoFuture;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, LogData, B256};
use alloy::providers::Provider as _;
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::http::{create_provider, Provider};
use super::websocket::ReconnectingWebSocket;
use crate::error::{IndexerError, IndexerResult};
use crate::events::IUniswapV3Pool;

/// A log as the pipeline sees it, detached from the RPC representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, signature first
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed data
    pub data: Bytes,
    /// Block the log was included in
    pub block_number: u64,
    /// Hash of that block, when the node reports it
    pub block_hash: Option<B256>,
    /// Transaction hash
    pub transaction_hash: B256,
    /// Position within the block
    pub log_index: u64,
    /// Set when a reorg retracted a previously delivered log
    pub removed: bool,
}

impl ChainLog {
    /// Converts an RPC log. Pending logs (no block or transaction) yield `None`.
    #[must_use]
    pub fn from_rpc(log: &Log) -> Option<Self> {
        Some(Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number?,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash?,
            log_index: log.log_index?,
            removed: log.removed,
        })
    }

    /// Topic 0, the event signature hash.
    #[must_use]
    pub fn signature(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    /// Topics and data in the form the `sol!` decoders take.
    #[must_use]
    pub fn log_data(&self) -> LogData {
        LogData::new_unchecked(self.topics.clone(), self.data.clone())
    }
}

/// Parameters of an `eth_getLogs` query or a log subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// First block, inclusive. Ignored for subscriptions.
    pub from_block: u64,
    /// Last block, inclusive. Ignored for subscriptions.
    pub to_block: u64,
    /// Emitting contracts
    pub addresses: Vec<Address>,
    /// Accepted topic-0 values
    pub event_signatures: Vec<B256>,
}

impl LogQuery {
    /// Query over a block range.
    #[must_use]
    pub const fn range(
        from_block: u64,
        to_block: u64,
        addresses: Vec<Address>,
        event_signatures: Vec<B256>,
    ) -> Self {
        Self {
            from_block,
            to_block,
            addresses,
            event_signatures,
        }
    }

    /// Whether a log satisfies the address and signature constraints.
    #[must_use]
    pub fn matches(&self, log: &ChainLog) -> bool {
        let address_ok = self.addresses.is_empty() || self.addresses.contains(&log.address);
        let signature_ok = self.event_signatures.is_empty()
            || log
                .signature()
                .is_some_and(|sig| self.event_signatures.contains(&sig));
        address_ok && signature_ok
    }

    fn to_filter(&self, with_range: bool) -> Filter {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .event_signature(self.event_signatures.clone());
        if with_range {
            filter.from_block(self.from_block).to_block(self.to_block)
        } else {
            filter
        }
    }
}

/// Block fields the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Parent block hash
    pub parent_hash: B256,
    /// Unix timestamp
    pub timestamp: u64,
}

/// Gas accounting of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Gas consumed
    pub gas_used: u128,
    /// Price actually paid per unit of gas
    pub effective_gas_price: u128,
}

/// Immutable pool parameters plus current liquidity, read from the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainPool {
    /// Lower-sorted token
    pub token0: Address,
    /// Higher-sorted token
    pub token1: Address,
    /// Fee tier in hundredths of a basis point
    pub fee: u32,
    /// Current in-range liquidity
    pub liquidity: u128,
}

/// Push stream of logs. Ends when the underlying connection drops.
pub type LogStream = BoxStream<'static, ChainLog>;

/// Blockchain RPC surface consumed by the indexer.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Current chain height.
    async fn block_number(&self) -> IndexerResult<u64>;

    /// Historical logs matching the query, in node order.
    async fn get_logs(&self, query: &LogQuery) -> IndexerResult<Vec<ChainLog>>;

    /// Header of a block; `None` if the node does not know it.
    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>>;

    /// Receipt gas data; `None` for unknown transactions.
    async fn get_transaction_receipt(&self, hash: B256) -> IndexerResult<Option<ReceiptSummary>>;

    /// `token0`, `token1`, `fee` and `liquidity` of a pool contract.
    async fn read_pool(&self, pool: Address) -> IndexerResult<OnChainPool>;

    /// Subscribe to logs matching the query's address and signature filters.
    async fn subscribe_logs(&self, query: &LogQuery) -> IndexerResult<LogStream>;

    /// Whether [`Self::subscribe_logs`] can succeed at all.
    fn supports_subscriptions(&self) -> bool;
}

/// [`ChainGateway`] over alloy providers.
pub struct AlloyChainGateway {
    http: Provider,
    ws: Option<Mutex<ReconnectingWebSocket>>,
    timeout: Duration,
}

impl std::fmt::Debug for AlloyChainGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyChainGateway")
            .field("websocket", &self.ws.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AlloyChainGateway {
    /// Builds the gateway. The WebSocket, when configured, connects on first
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if `rpc_url` is malformed.
    pub fn new(rpc_url: &str, ws_url: Option<&str>, timeout: Duration) -> IndexerResult<Self> {
        Ok(Self {
            http: create_provider(rpc_url)?,
            ws: ws_url.map(|url| Mutex::new(ReconnectingWebSocket::new(url.to_string()))),
            timeout,
        })
    }

    /// Underlying HTTP provider.
    #[must_use]
    pub const fn http(&self) -> &Provider {
        &self.http
    }

    async fn bounded<T, E, F>(&self, what: &'static str, fut: F) -> IndexerResult<T>
    where
        F: IntoFuture<Output = Result<T, E>>,
        F::IntoFuture: Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(IndexerError::rpc(format!("{what} failed"), Some(Box::new(e)))),
            Err(_) => Err(IndexerError::rpc(
                format!("{what} timed out after {:?}", self.timeout),
                None,
            )),
        }
    }
}

#[async_trait]
impl ChainGateway for AlloyChainGateway {
    async fn block_number(&self) -> IndexerResult<u64> {
        self.bounded("eth_blockNumber", self.http.get_block_number())
            .await
    }

    #[instrument(skip(self, query), fields(from = query.from_block, to = query.to_block, count = tracing::field::Empty))]
    async fn get_logs(&self, query: &LogQuery) -> IndexerResult<Vec<ChainLog>> {
        let filter = query.to_filter(true);
        let logs = self
            .bounded("eth_getLogs", self.http.get_logs(&filter))
            .await?;

        let converted: Vec<ChainLog> = logs.iter().filter_map(ChainLog::from_rpc).collect();
        if converted.len() != logs.len() {
            warn!(
                dropped = logs.len() - converted.len(),
                "Ignoring logs without block or transaction data"
            );
        }
        tracing::Span::current().record("count", converted.len());
        Ok(converted)
    }

    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>> {
        let block = self
            .bounded(
                "eth_getBlockByNumber",
                self.http.get_block_by_number(
                    BlockNumberOrTag::Number(number),
                    BlockTransactionsKind::Hashes,
                ),
            )
            .await?;

        Ok(block.map(|b| BlockHeader {
            number: b.header.number,
            hash: b.header.hash,
            parent_hash: b.header.parent_hash,
            timestamp: b.header.timestamp,
        }))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> IndexerResult<Option<ReceiptSummary>> {
        let receipt = self
            .bounded(
                "eth_getTransactionReceipt",
                self.http.get_transaction_receipt(hash),
            )
            .await?;

        Ok(receipt.map(|r| ReceiptSummary {
            gas_used: u128::from(r.gas_used),
            effective_gas_price: r.effective_gas_price,
        }))
    }

    #[instrument(skip(self))]
    async fn read_pool(&self, pool: Address) -> IndexerResult<OnChainPool> {
        let contract = IUniswapV3Pool::new(pool, &self.http);

        let token0 = self.bounded("token0()", contract.token0().call()).await?._0;
        let token1 = self.bounded("token1()", contract.token1().call()).await?._0;
        let fee = self.bounded("fee()", contract.fee().call()).await?._0;
        let liquidity = self
            .bounded("liquidity()", contract.liquidity().call())
            .await?
            ._0;

        debug!(%token0, %token1, "Read pool parameters");
        Ok(OnChainPool {
            token0,
            token1,
            fee: fee.to::<u32>(),
            liquidity,
        })
    }

    async fn subscribe_logs(&self, query: &LogQuery) -> IndexerResult<LogStream> {
        let Some(ws) = &self.ws else {
            return Err(IndexerError::websocket_subscription(
                "No WS_URL configured; subscriptions are unavailable",
                None,
            ));
        };

        let filter = query.to_filter(false);
        let mut ws = ws.lock().await;
        let provider = ws.connect().await?;
        let subscription = match provider.subscribe_logs(&filter).await {
            Ok(sub) => sub,
            Err(e) => {
                // The shared connection may have dropped; retry once on a fresh one.
                warn!(error = %e, "Log subscription failed, reconnecting");
                ws.reconnect().await?.subscribe_logs(&filter).await?
            }
        };

        Ok(subscription
            .into_stream()
            .filter_map(|log| async move { ChainLog::from_rpc(&log) })
            .boxed())
    }

    fn supports_subscriptions(&self) -> bool {
        self.ws.is_some()
    }
}
