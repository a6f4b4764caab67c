//! Reorg detection against stored block hashes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::db::models::{BlockHashRecord, RollbackSummary};
use crate::db::StorageGateway;
use crate::error::{IndexerError, IndexerResult};
use crate::rpc::gateway::ChainGateway;

/// Compares stored block hashes with the canonical chain and rolls storage
/// back to the common ancestor when they disagree.
///
/// ## Algorithm
///
/// 1. Load stored hashes in `[last_block - depth, last_block]`
/// 2. If the newest stored hash is still canonical, there is no reorg
/// 3. Otherwise binary-search the stored records for the highest block that
///    is still canonical; the divergence point is the block after it
/// 4. If the oldest record in the window is forked, the newest stored hash
///    below the window serves as the anchor when it is still canonical
/// 5. Otherwise the reorg is deeper than the window
pub struct ReorgDetector {
    chain: Arc<dyn ChainGateway>,
    storage: Arc<dyn StorageGateway>,
    depth: u64,
    reorg_count: AtomicU64,
}

impl std::fmt::Debug for ReorgDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorgDetector")
            .field("depth", &self.depth)
            .field("reorg_count", &self.reorg_count())
            .finish_non_exhaustive()
    }
}

impl ReorgDetector {
    /// Creates a detector checking `depth` blocks behind the cursor.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainGateway>, storage: Arc<dyn StorageGateway>, depth: u64) -> Self {
        Self {
            chain,
            storage,
            depth,
            reorg_count: AtomicU64::new(0),
        }
    }

    /// Reorgs recovered since start.
    #[must_use]
    pub fn reorg_count(&self) -> u64 {
        self.reorg_count.load(Ordering::Relaxed)
    }

    /// First block that is no longer canonical, if any.
    ///
    /// # Errors
    ///
    /// RPC failures propagate. Returns [`IndexerError::ReorgTooDeep`] when no
    /// stored hash in the window is canonical and the nearest one below it is
    /// missing or forked too.
    #[instrument(skip(self))]
    pub async fn find_divergence(&self, last_block: u64) -> IndexerResult<Option<u64>> {
        let checked_from = last_block.saturating_sub(self.depth);
        let mut stored = self
            .storage
            .block_hashes_between(checked_from, last_block)
            .await?;

        let Some(newest) = stored.last() else {
            debug!("No stored block hashes in the check window");
            return Ok(None);
        };
        if self.is_canonical(newest).await? {
            return Ok(None);
        }

        warn!(
            block = newest.number,
            stored_hash = %newest.hash,
            "Stored block hash is no longer canonical"
        );

        // Hashes are recorded per scanned range, so the window may start on a
        // forked record while the last canonical one sits just below it.
        if !self.is_canonical(&stored[0]).await? {
            match self.storage.latest_block_hash_before(checked_from).await? {
                Some(anchor) if self.is_canonical(&anchor).await? => {
                    debug!(anchor = anchor.number, "Using stored hash below the window as anchor");
                    stored.insert(0, anchor);
                }
                _ => {
                    return Err(IndexerError::ReorgTooDeep {
                        checked_from,
                        last_block,
                    })
                }
            }
        }

        // stored[low] is canonical, stored[high] is not.
        let mut low = 0;
        let mut high = stored.len() - 1;
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.is_canonical(&stored[mid]).await? {
                low = mid;
            } else {
                high = mid;
            }
        }

        let ancestor = stored[low].number;
        info!(
            ancestor,
            depth = last_block.saturating_sub(ancestor),
            "Common ancestor found"
        );
        Ok(Some(ancestor + 1))
    }

    /// Detect a reorg behind `last_block` and roll storage back if there is one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_divergence`], plus storage errors from the rollback.
    /// A too-deep reorg leaves storage untouched.
    pub async fn check_and_recover(&self, last_block: u64) -> IndexerResult<Option<RollbackSummary>> {
        let divergence = match self.find_divergence(last_block).await {
            Ok(Some(block)) => block,
            Ok(None) => return Ok(None),
            Err(e @ IndexerError::ReorgTooDeep { .. }) => {
                error!(last_block, depth = self.depth, error = %e, "Reorg deeper than check window");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let summary = self.storage.rollback_from_block(divergence).await?;
        self.reorg_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            divergence,
            swaps_deleted = summary.swaps_deleted,
            pools_deleted = summary.pools_deleted,
            cursor = summary.cursor,
            "Reorg recovered"
        );
        Ok(Some(summary))
    }

    async fn is_canonical(&self, record: &BlockHashRecord) -> IndexerResult<bool> {
        let header = self.chain.get_block(record.number).await?;
        Ok(header.is_some_and(|h| h.hash == record.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, Repository};
    use crate::rpc::gateway::{BlockHeader, ChainLog, LogQuery, LogStream, OnChainPool, ReceiptSummary};
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Chain that only answers block lookups.
    struct Blocks(HashMap<u64, B256>);

    #[async_trait]
    impl ChainGateway for Blocks {
        async fn block_number(&self) -> IndexerResult<u64> {
            Ok(self.0.keys().copied().max().unwrap_or_default())
        }
        async fn get_logs(&self, _: &LogQuery) -> IndexerResult<Vec<ChainLog>> {
            Ok(vec![])
        }
        async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>> {
            Ok(self.0.get(&number).map(|hash| BlockHeader {
                number,
                hash: *hash,
                parent_hash: B256::ZERO,
                timestamp: number,
            }))
        }
        async fn get_transaction_receipt(&self, _: B256) -> IndexerResult<Option<ReceiptSummary>> {
            Ok(None)
        }
        async fn read_pool(&self, _: Address) -> IndexerResult<OnChainPool> {
            Err(IndexerError::rpc("unsupported", None))
        }
        async fn subscribe_logs(&self, _: &LogQuery) -> IndexerResult<LogStream> {
            Err(IndexerError::rpc("unsupported", None))
        }
        fn supports_subscriptions(&self) -> bool {
            false
        }
    }

    fn hash(n: u64, fork: u8) -> B256 {
        let mut bytes = [0_u8; 32];
        bytes[..8].copy_from_slice(&n.to_be_bytes());
        bytes[31] = fork;
        B256::from(bytes)
    }

    async fn detector(canonical: HashMap<u64, B256>, stored: &[(u64, B256)]) -> ReorgDetector {
        let repo = Repository::new(create_pool("sqlite::memory:").await.expect("db"));
        let records: Vec<BlockHashRecord> = stored
            .iter()
            .map(|(number, hash)| BlockHashRecord {
                number: *number,
                hash: *hash,
                parent_hash: B256::ZERO,
                timestamp: *number,
            })
            .collect();
        repo.record_block_hashes(&records).await.expect("hashes");
        ReorgDetector::new(Arc::new(Blocks(canonical)), Arc::new(repo), 64)
    }

    #[tokio::test]
    async fn test_no_reorg_when_newest_matches() {
        let chain: HashMap<u64, B256> = (90..=100).map(|n| (n, hash(n, 0))).collect();
        let stored: Vec<(u64, B256)> = (90..=100).map(|n| (n, hash(n, 0))).collect();
        let detector = detector(chain, &stored).await;

        assert_eq!(detector.find_divergence(100).await.expect("check"), None);
    }

    #[tokio::test]
    async fn test_divergence_is_block_after_ancestor() {
        // Chain replaced blocks 96..=100.
        let chain: HashMap<u64, B256> = (90..=100)
            .map(|n| (n, hash(n, u8::from(n >= 96))))
            .collect();
        let stored: Vec<(u64, B256)> = (90..=100).map(|n| (n, hash(n, 0))).collect();
        let detector = detector(chain, &stored).await;

        assert_eq!(detector.find_divergence(100).await.expect("check"), Some(96));
    }

    #[tokio::test]
    async fn test_sparse_records_still_find_ancestor() {
        let chain: HashMap<u64, B256> = (1..=200)
            .map(|n| (n, hash(n, u8::from(n >= 150))))
            .collect();
        let stored = vec![(140, hash(140, 0)), (148, hash(148, 0)), (155, hash(155, 0)), (160, hash(160, 0))];
        let detector = detector(chain, &stored).await;

        assert_eq!(detector.find_divergence(160).await.expect("check"), Some(149));
    }

    #[tokio::test]
    async fn test_anchor_below_window_resolves_sparse_fork() {
        // One hash per scanned range of 100 blocks; only block 700 was replaced.
        let chain: HashMap<u64, B256> = (500..=712)
            .map(|n| (n, hash(n, u8::from(n == 700))))
            .collect();
        let stored = vec![(500, hash(500, 0)), (600, hash(600, 0)), (700, hash(700, 0))];
        let detector = detector(chain, &stored).await;

        assert_eq!(detector.find_divergence(700).await.expect("check"), Some(601));
    }

    #[tokio::test]
    async fn test_forked_anchor_is_still_too_deep() {
        let chain: HashMap<u64, B256> = (500..=712).map(|n| (n, hash(n, 1))).collect();
        let stored = vec![(600, hash(600, 0)), (700, hash(700, 0))];
        let detector = detector(chain, &stored).await;

        let result = detector.find_divergence(700).await;
        assert!(matches!(
            result,
            Err(IndexerError::ReorgTooDeep { checked_from: 636, last_block: 700 })
        ));
    }

    #[tokio::test]
    async fn test_too_deep_reorg_is_an_error() {
        let chain: HashMap<u64, B256> = (90..=100).map(|n| (n, hash(n, 1))).collect();
        let stored: Vec<(u64, B256)> = (90..=100).map(|n| (n, hash(n, 0))).collect();
        let detector = detector(chain, &stored).await;

        let result = detector.check_and_recover(100).await;
        assert!(matches!(
            result,
            Err(IndexerError::ReorgTooDeep { checked_from: 36, last_block: 100 })
        ));
        assert_eq!(detector.reorg_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_window_is_not_a_reorg() {
        let detector = detector(HashMap::new(), &[]).await;
        assert!(detector.check_and_recover(10).await.expect("check").is_none());
    }
}
