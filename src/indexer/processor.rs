//! Pool event persistence.
//!
//! [`EventProcessor`] turns raw pool logs into stored swaps and liquidity
//! events. Logs are ordered by `(block_number, log_index)`, enriched with the
//! block timestamp and transaction gas, then written in sub-batches of
//! [`PERSIST_CHUNK_SIZE`]. After every committed sub-batch the pool's cached
//! price state is set from the last swap in it.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::db::models::{
    address_key, hash_key, now_ts, BlockHashRecord, LiquidityEventRecord, LiquidityKind,
    PoolStateUpdate, SwapRecord,
};
use crate::db::StorageGateway;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{decode_log, DecodedEvent, LiquidityChange, SwapEvent, POOL_EVENT_SIGNATURES};
use crate::rpc::gateway::{BlockHeader, ChainGateway, ChainLog, LogQuery, ReceiptSummary};

/// Events written per storage transaction.
pub const PERSIST_CHUNK_SIZE: usize = 50;

/// Counts from processing one pool over one range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Swap rows written (new or timestamp-refreshed)
    pub swaps: usize,
    /// Mint/Burn rows written
    pub liquidity_events: usize,
    /// Logs that failed to decode
    pub decode_failures: usize,
    /// Logs skipped because the pool is not in storage
    pub skipped: usize,
}

impl ProcessReport {
    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: &Self) {
        self.swaps += other.swaps;
        self.liquidity_events += other.liquidity_events;
        self.decode_failures += other.decode_failures;
        self.skipped += other.skipped;
    }
}

/// Per-call caches so each block and transaction is fetched once.
#[derive(Default)]
struct Enrichment {
    blocks: HashMap<u64, BlockHeader>,
    receipts: HashMap<B256, Option<ReceiptSummary>>,
}

/// Decodes, enriches and persists pool events.
#[derive(Clone)]
pub struct EventProcessor {
    chain: Arc<dyn ChainGateway>,
    storage: Arc<dyn StorageGateway>,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor").finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Creates a processor over the given gateways.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainGateway>, storage: Arc<dyn StorageGateway>) -> Self {
        Self { chain, storage }
    }

    /// Fetch and persist Swap/Mint/Burn logs of `pool` in `[from, to]`.
    ///
    /// # Errors
    ///
    /// RPC failures (log query, block lookup) and storage failures abort the
    /// call. Decode failures only skip the affected log.
    #[instrument(skip(self), fields(pool = %pool))]
    pub async fn process_range(&self, pool: Address, from: u64, to: u64) -> IndexerResult<ProcessReport> {
        let query = LogQuery::range(from, to, vec![pool], POOL_EVENT_SIGNATURES.to_vec());
        let logs = self.chain.get_logs(&query).await?;
        if logs.is_empty() {
            return Ok(ProcessReport::default());
        }
        self.process_logs(pool, logs).await
    }

    /// Persist already-fetched logs of `pool`.
    ///
    /// Logs flagged `removed` or emitted by another address are ignored.
    ///
    /// # Errors
    ///
    /// Same as [`Self::process_range`].
    pub async fn process_logs(&self, pool: Address, mut logs: Vec<ChainLog>) -> IndexerResult<ProcessReport> {
        let mut report = ProcessReport::default();
        logs.retain(|log| !log.removed && log.address == pool);

        if self.storage.get_pool(&pool).await?.is_none() {
            warn!(pool = %pool, count = logs.len(), "Pool not in storage, skipping its events");
            report.skipped = logs.len();
            return Ok(report);
        }

        logs.sort_by_key(|log| (log.block_number, log.log_index));
        let mut enrichment = Enrichment::default();

        for chunk in logs.chunks(PERSIST_CHUNK_SIZE) {
            let mut swaps = Vec::new();
            let mut liquidity = Vec::new();
            let mut last_state: Option<PoolStateUpdate> = None;

            for log in chunk {
                let event = match decode_log(log) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(
                            tx = %log.transaction_hash,
                            log_index = log.log_index,
                            error = %e,
                            "Skipping undecodable log"
                        );
                        report.decode_failures += 1;
                        continue;
                    }
                };

                match event {
                    DecodedEvent::Swap(swap) => {
                        swaps.push(self.swap_record(pool, log, &swap, &mut enrichment).await?);
                        last_state = Some(PoolStateUpdate {
                            sqrt_price_x96: swap.sqrt_price_x96,
                            liquidity: swap.liquidity,
                            tick: swap.tick,
                            block_number: log.block_number,
                            log_index: log.log_index,
                        });
                    }
                    DecodedEvent::Mint(change) => liquidity.push(
                        self.liquidity_record(pool, log, LiquidityKind::Mint, &change, &mut enrichment)
                            .await,
                    ),
                    DecodedEvent::Burn(change) => liquidity.push(
                        self.liquidity_record(pool, log, LiquidityKind::Burn, &change, &mut enrichment)
                            .await,
                    ),
                    DecodedEvent::PoolCreated(_) => {
                        debug!("Ignoring factory event in pool log stream");
                    }
                }
            }

            report.swaps += self.storage.upsert_swaps(&swaps).await?;
            report.liquidity_events += self.storage.upsert_liquidity_events(&liquidity).await?;

            if let Some(state) = last_state {
                if !self.storage.update_pool_state(&pool, &state).await? {
                    debug!(
                        pool = %pool,
                        block = state.block_number,
                        log_index = state.log_index,
                        "Pool state already reflects a later swap"
                    );
                }
            }
        }

        let hashes: Vec<BlockHashRecord> = enrichment
            .blocks
            .values()
            .map(|header| BlockHashRecord {
                number: header.number,
                hash: header.hash,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
            })
            .collect();
        self.storage.record_block_hashes(&hashes).await?;

        if report.swaps + report.liquidity_events > 0 {
            info!(
                pool = %pool,
                swaps = report.swaps,
                liquidity_events = report.liquidity_events,
                decode_failures = report.decode_failures,
                "Pool events persisted"
            );
        }
        Ok(report)
    }

    async fn block(&self, number: u64, enrichment: &mut Enrichment) -> IndexerResult<BlockHeader> {
        if let Some(header) = enrichment.blocks.get(&number) {
            return Ok(*header);
        }
        let header = self
            .chain
            .get_block(number)
            .await?
            .ok_or_else(|| IndexerError::rpc(format!("Block {number} not found"), None))?;
        enrichment.blocks.insert(number, header);
        Ok(header)
    }

    async fn receipt(&self, hash: B256, enrichment: &mut Enrichment) -> Option<ReceiptSummary> {
        if let Some(cached) = enrichment.receipts.get(&hash) {
            return *cached;
        }
        let receipt = match self.chain.get_transaction_receipt(hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(tx = %hash, error = %e, "Receipt unavailable, storing swap without gas data");
                None
            }
        };
        enrichment.receipts.insert(hash, receipt);
        receipt
    }

    async fn swap_record(
        &self,
        pool: Address,
        log: &ChainLog,
        swap: &SwapEvent,
        enrichment: &mut Enrichment,
    ) -> IndexerResult<SwapRecord> {
        let header = self.block(log.block_number, enrichment).await?;
        let receipt = self.receipt(log.transaction_hash, enrichment).await;

        Ok(SwapRecord {
            transaction_hash: hash_key(&log.transaction_hash),
            log_index: to_i64(log.log_index),
            pool_address: address_key(&pool),
            block_number: to_i64(log.block_number),
            sender: address_key(&swap.sender),
            recipient: address_key(&swap.recipient),
            amount0: swap.amount0.to_string(),
            amount1: swap.amount1.to_string(),
            sqrt_price_x96: swap.sqrt_price_x96.to_string(),
            liquidity: swap.liquidity.to_string(),
            tick: i64::from(swap.tick),
            gas_used: receipt.map(|r| r.gas_used.to_string()),
            gas_price: receipt.map(|r| r.effective_gas_price.to_string()),
            timestamp: to_i64(header.timestamp),
            created_at: now_ts(),
        })
    }

    async fn liquidity_record(
        &self,
        pool: Address,
        log: &ChainLog,
        kind: LiquidityKind,
        change: &LiquidityChange,
        enrichment: &mut Enrichment,
    ) -> LiquidityEventRecord {
        let timestamp = match self.block(log.block_number, enrichment).await {
            Ok(header) => Some(to_i64(header.timestamp)),
            Err(e) => {
                warn!(block = log.block_number, error = %e, "Block timestamp unavailable");
                None
            }
        };

        LiquidityEventRecord {
            transaction_hash: hash_key(&log.transaction_hash),
            log_index: to_i64(log.log_index),
            pool_address: address_key(&pool),
            block_number: to_i64(log.block_number),
            kind: kind.as_str().to_string(),
            owner: address_key(&change.owner),
            tick_lower: i64::from(change.tick_lower),
            tick_upper: i64::from(change.tick_upper),
            amount: change.amount.to_string(),
            amount0: change.amount0.to_string(),
            amount1: change.amount1.to_string(),
            timestamp,
            created_at: now_ts(),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merge() {
        let mut total = ProcessReport {
            swaps: 2,
            liquidity_events: 1,
            decode_failures: 0,
            skipped: 0,
        };
        total.merge(&ProcessReport {
            swaps: 3,
            liquidity_events: 0,
            decode_failures: 1,
            skipped: 4,
        });
        assert_eq!(
            total,
            ProcessReport {
                swaps: 5,
                liquidity_events: 1,
                decode_failures: 1,
                skipped: 4,
            }
        );
    }

    #[test]
    fn test_to_i64_saturates() {
        assert_eq!(to_i64(7), 7);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }
}
