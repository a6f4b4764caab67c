//! Cursor-driven block scanning.
//!
//! [`BlockScanner`] advances the persistent cursor over confirmed block
//! ranges. A tick checks for reorgs, computes the next batch, discovers new
//! pools, processes every tracked pool over the batch and only then moves the
//! cursor. Ticks, reindexes and real-time logs share one re-entrancy flag:
//! whoever finds it taken backs off instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::pools::PoolLifecycleManager;
use super::processor::{EventProcessor, ProcessReport};
use crate::config::Config;
use crate::db::models::{BlockHashRecord, RollbackSummary};
use crate::db::StorageGateway;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{decode_log, DecodedEvent};
use crate::reorg::ReorgDetector;
use crate::rpc::gateway::{ChainGateway, ChainLog};

/// Scanner tuning, usually taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerSettings {
    /// First block scanned when no cursor exists
    pub start_block: u64,
    /// Blocks behind head treated as final
    pub confirmations: u64,
    /// Maximum blocks per batch
    pub batch_size: u64,
    /// Pause between reindex batches
    pub reindex_delay: Duration,
    /// Lag tolerated before the status reports unhealthy
    pub health_max_lag: u64,
    /// Blocks behind the cursor checked for reorgs
    pub reorg_check_depth: u64,
}

impl ScannerSettings {
    /// Scanner settings from the loaded configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            start_block: config.start_block(),
            confirmations: config.confirmations(),
            batch_size: config.batch_size(),
            reindex_delay: config.reindex_delay(),
            health_max_lag: config.health_max_lag(),
            reorg_check_depth: config.reorg_check_depth(),
        }
    }
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            confirmations: 12,
            batch_size: 100,
            reindex_delay: Duration::from_millis(200),
            health_max_lag: 100,
            reorg_check_depth: 64,
        }
    }
}

/// A pool whose events could not be processed in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolFailure {
    /// Pool address
    pub pool: Address,
    /// Error message
    pub error: String,
}

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// First block of the batch
    pub from_block: u64,
    /// Last block of the batch; the cursor now points here
    pub to_block: u64,
    /// Pools created by factory events in the batch
    pub pools_created: usize,
    /// Pools whose events were fetched
    pub pools_scanned: usize,
    /// Event counts over all pools
    pub events: ProcessReport,
    /// Pools skipped after a non-transient failure
    pub failures: Vec<PoolFailure>,
    /// Rollback performed before the batch, if a reorg was found
    pub reorg: Option<RollbackSummary>,
}

/// Result of a scanner tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Scanner is paused
    Paused,
    /// Another scan holds the guard; the tick was dropped
    Busy,
    /// No confirmed block past the cursor
    NoNewBlocks {
        /// Chain head at the time of the tick
        head: u64,
    },
    /// One batch was processed
    Advanced(BatchReport),
}

/// What happened to a pushed log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeOutcome {
    /// A scan was running or the scanner is paused
    Dropped,
    /// A removed log deleted this many stored rows
    Removed(u64),
    /// A factory log created or skipped a pool
    PoolEvent,
    /// A pool log was persisted
    Persisted,
    /// The log belongs to no tracked pool
    Ignored,
}

/// Snapshot for the status endpoint and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    /// A scan or reindex currently holds the guard
    pub is_running: bool,
    /// Ticks are being ignored
    pub is_paused: bool,
    /// Chain head, `None` if the node is unreachable
    pub current_chain_block: Option<u64>,
    /// Cursor position
    pub last_indexed_block: Option<u64>,
    /// Head minus cursor
    pub blocks_behind: Option<u64>,
    /// Unix time of the last cursor write
    pub last_update: Option<i64>,
    /// Node reachable and lag within bounds
    pub is_healthy: bool,
    /// Reorgs recovered since start
    pub reorgs_recovered: u64,
}

/// Holds the scanning flag; clears it on drop.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Advances the cursor and drives event processing.
pub struct BlockScanner {
    chain: Arc<dyn ChainGateway>,
    storage: Arc<dyn StorageGateway>,
    pools: Arc<PoolLifecycleManager>,
    processor: EventProcessor,
    reorg: ReorgDetector,
    settings: ScannerSettings,
    scanning: AtomicBool,
    paused: AtomicBool,
}

impl std::fmt::Debug for BlockScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockScanner")
            .field("settings", &self.settings)
            .field("scanning", &self.is_scanning())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl BlockScanner {
    /// Creates a scanner over the shared gateways and pool manager.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        storage: Arc<dyn StorageGateway>,
        pools: Arc<PoolLifecycleManager>,
        settings: ScannerSettings,
    ) -> Self {
        let processor = EventProcessor::new(chain.clone(), storage.clone());
        let reorg = ReorgDetector::new(chain.clone(), storage.clone(), settings.reorg_check_depth);
        Self {
            chain,
            storage,
            pools,
            processor,
            reorg,
            settings,
            scanning: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Scanner settings.
    #[must_use]
    pub const fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Pool manager shared with the scanner.
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolLifecycleManager> {
        &self.pools
    }

    /// Whether a scan currently holds the guard.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Whether ticks are ignored.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stop processing ticks and pushed logs.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("Scanner paused");
    }

    /// Resume processing.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("Scanner resumed");
    }

    /// Run one scan step.
    ///
    /// # Errors
    ///
    /// RPC failures abort the batch without moving the cursor. A reorg deeper
    /// than the check window returns [`IndexerError::ReorgTooDeep`].
    #[instrument(skip(self))]
    pub async fn tick(&self) -> IndexerResult<TickOutcome> {
        if self.is_paused() {
            return Ok(TickOutcome::Paused);
        }
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            debug!("Scan already running, dropping tick");
            return Ok(TickOutcome::Busy);
        };

        let head = self.chain.block_number().await?;

        let mut reorg = None;
        if let Some(cursor) = self.storage.get_cursor().await? {
            reorg = self.reorg.check_and_recover(cursor.last_block_u64()).await?;
            if reorg.is_some() {
                self.pools.reconcile().await?;
            }
        }

        let last = self.storage.get_cursor().await?.map(|c| c.last_block_u64());
        let Some((from, to)) = self.next_range(last, head) else {
            debug!(head, last_indexed = ?last, "No new confirmed blocks");
            return Ok(TickOutcome::NoNewBlocks { head });
        };

        let mut report = self.scan_range(from, to).await?;
        report.reorg = reorg;
        Ok(TickOutcome::Advanced(report))
    }

    /// Rescan everything from block `block` up to the confirmed head.
    ///
    /// Returns the final cursor. Reindexing from genesis clears the cursor
    /// first, so it is `None` if not even block 0 is confirmed yet.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::ScanInProgress`] if a scan holds the guard, and
    /// any RPC or storage error that aborts a batch.
    #[instrument(skip(self))]
    pub async fn reindex_from_block(&self, block: u64) -> IndexerResult<Option<u64>> {
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            return Err(IndexerError::ScanInProgress);
        };

        let mut last = block.checked_sub(1);
        match last {
            Some(previous) => self.storage.set_cursor(previous).await?,
            None => self.storage.clear_cursor().await?,
        }
        info!(from = block, "Reindex started");

        let mut next = block;
        let mut batches = 0_u64;
        loop {
            let head = self.chain.block_number().await?;
            let Some((from, to)) = self.range_starting_at(next, head) else {
                break;
            };
            let report = self.scan_range(from, to).await?;
            last = Some(report.to_block);
            next = report.to_block + 1;
            batches += 1;
            tokio::time::sleep(self.settings.reindex_delay).await;
        }

        info!(last_block = ?last, batches, "Reindex complete");
        Ok(last)
    }

    /// Handle a log pushed by a subscription.
    ///
    /// # Errors
    ///
    /// Storage and RPC errors while persisting the log.
    pub async fn handle_realtime_log(&self, log: ChainLog) -> IndexerResult<RealtimeOutcome> {
        if self.is_paused() {
            return Ok(RealtimeOutcome::Dropped);
        }
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            debug!(tx = %log.transaction_hash, "Scan running, dropping pushed log");
            return Ok(RealtimeOutcome::Dropped);
        };

        if log.removed {
            let deleted = self
                .storage
                .delete_event(&log.transaction_hash, log.log_index)
                .await?;
            warn!(tx = %log.transaction_hash, log_index = log.log_index, deleted, "Removed log retracted");
            return Ok(RealtimeOutcome::Removed(deleted));
        }

        if log.address == self.pools.factory() {
            return match decode_log(&log) {
                Ok(DecodedEvent::PoolCreated(event)) => {
                    self.pools.handle_pool_created(&event, log.block_number).await?;
                    Ok(RealtimeOutcome::PoolEvent)
                }
                Ok(_) => Ok(RealtimeOutcome::Ignored),
                Err(e) => {
                    warn!(tx = %log.transaction_hash, error = %e, "Skipping undecodable factory log");
                    Ok(RealtimeOutcome::Ignored)
                }
            };
        }

        if !self.pools.is_tracked(&log.address).await {
            return Ok(RealtimeOutcome::Ignored);
        }
        self.processor.process_logs(log.address, vec![log]).await?;
        Ok(RealtimeOutcome::Persisted)
    }

    /// Current scanner status. Never fails; an unreachable node shows up as
    /// unhealthy.
    pub async fn get_status(&self) -> ScanStatus {
        let head = match self.chain.block_number().await {
            Ok(head) => Some(head),
            Err(e) => {
                warn!(error = %e, "Chain head unavailable for status");
                None
            }
        };
        let cursor = match self.storage.get_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "Cursor unavailable for status");
                None
            }
        };

        let last_indexed = cursor.map(|c| c.last_block_u64());
        let blocks_behind = head.map(|h| h.saturating_sub(last_indexed.unwrap_or_default()));
        let is_healthy = blocks_behind.is_some_and(|lag| lag <= self.settings.health_max_lag);

        ScanStatus {
            is_running: self.is_scanning(),
            is_paused: self.is_paused(),
            current_chain_block: head,
            last_indexed_block: last_indexed,
            blocks_behind,
            last_update: cursor.map(|c| c.last_update),
            is_healthy,
            reorgs_recovered: self.reorg.reorg_count(),
        }
    }

    fn next_range(&self, last: Option<u64>, head: u64) -> Option<(u64, u64)> {
        let from = last.map_or(self.settings.start_block, |l| l + 1);
        self.range_starting_at(from, head)
    }

    fn range_starting_at(&self, from: u64, head: u64) -> Option<(u64, u64)> {
        if head < self.settings.confirmations {
            return None;
        }
        let target = head - self.settings.confirmations;
        if target < from {
            return None;
        }
        let to = from
            .saturating_add(self.settings.batch_size.saturating_sub(1))
            .min(target);
        Some((from, to))
    }

    async fn scan_range(&self, from: u64, to: u64) -> IndexerResult<BatchReport> {
        let started = Instant::now();
        let discovery = self.pools.discover_new_pools(from, to).await?;

        let mut report = BatchReport {
            from_block: from,
            to_block: to,
            pools_created: discovery.created,
            ..BatchReport::default()
        };

        for pool in self.pools.tracked_pools().await {
            report.pools_scanned += 1;
            match self.processor.process_range(pool, from, to).await {
                Ok(events) => report.events.merge(&events),
                Err(e @ IndexerError::RpcError { .. }) => {
                    warn!(pool = %pool, from, to, error = %e, "RPC failure, aborting batch");
                    return Err(e);
                }
                Err(e) => {
                    error!(pool = %pool, from, to, error = %e, "Pool processing failed, skipping");
                    report.failures.push(PoolFailure {
                        pool,
                        error: e.to_string(),
                    });
                }
            }
        }

        let header = self
            .chain
            .get_block(to)
            .await?
            .ok_or_else(|| IndexerError::rpc(format!("Block {to} not found"), None))?;
        self.storage
            .record_block_hashes(&[BlockHashRecord {
                number: header.number,
                hash: header.hash,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
            }])
            .await?;
        self.storage.set_cursor(to).await?;

        info!(
            from,
            to,
            pools = report.pools_scanned,
            swaps = report.events.swaps,
            liquidity_events = report.events.liquidity_events,
            failures = report.failures.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Batch indexed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        let first = ScanGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(ScanGuard::acquire(&flag).is_none());
        drop(first);
        assert!(ScanGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_tick_outcome_serializes_with_tag() {
        let json = serde_json::to_value(TickOutcome::NoNewBlocks { head: 7 }).expect("json");
        assert_eq!(json["outcome"], "no_new_blocks");
        assert_eq!(json["head"], 7);
    }
}
