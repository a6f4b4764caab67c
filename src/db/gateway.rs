//! Storage contract consumed by the indexing pipeline and the price engine.
//!
//! The pipeline only talks to storage through [`StorageGateway`]; the sqlx
//! [`Repository`](super::repository::Repository) is the production
//! implementation.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use super::models::{
    BlockHashRecord, IndexerCursor, LiquidityEventRecord, NewPool, PoolInsertOutcome, PoolRecord,
    PoolStateUpdate, PoolStatistic, RollbackSummary, SwapAmountRow, SwapRecord, TokenRecord,
    TokenStatistic,
};
use crate::error::IndexerResult;

/// Typed CRUD over the indexer entities plus the raw volume aggregates.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    // ---- tokens ----

    /// Insert or update a token (operator seeding).
    async fn upsert_token(&self, token: &TokenRecord) -> IndexerResult<()>;

    /// Look up a token.
    async fn get_token(&self, address: &Address) -> IndexerResult<Option<TokenRecord>>;

    /// Tokens referenced by at least one active pool.
    async fn list_pooled_tokens(&self) -> IndexerResult<Vec<TokenRecord>>;

    // ---- pools ----

    /// Look up a pool, active or not.
    async fn get_pool(&self, address: &Address) -> IndexerResult<Option<PoolRecord>>;

    /// All active pools.
    async fn list_active_pools(&self) -> IndexerResult<Vec<PoolRecord>>;

    /// Insert a pool if both tokens exist. Existing active pools are left untouched.
    async fn insert_pool(&self, pool: &NewPool) -> IndexerResult<PoolInsertOutcome>;

    /// Mark a pool inactive. Returns `false` if it was not active.
    async fn deactivate_pool(&self, address: &Address) -> IndexerResult<bool>;

    /// Overwrite the cached price state of a pool unless the cached state
    /// comes from a later `(block, log_index)`. Returns whether it was applied.
    async fn update_pool_state(
        &self,
        address: &Address,
        state: &PoolStateUpdate,
    ) -> IndexerResult<bool>;

    // ---- events ----

    /// Upsert swaps in one transaction keyed by `(transaction_hash, log_index)`;
    /// a conflict only refreshes `timestamp`.
    async fn upsert_swaps(&self, swaps: &[SwapRecord]) -> IndexerResult<usize>;

    /// Upsert Mint/Burn rows with the same key and conflict rule as swaps.
    async fn upsert_liquidity_events(&self, events: &[LiquidityEventRecord])
        -> IndexerResult<usize>;

    /// Delete the swap or liquidity event with this key (removed logs).
    async fn delete_event(&self, transaction_hash: &B256, log_index: u64) -> IndexerResult<u64>;

    /// Look up a swap by its key.
    async fn get_swap(
        &self,
        transaction_hash: &B256,
        log_index: u64,
    ) -> IndexerResult<Option<SwapRecord>>;

    /// Number of stored swaps.
    async fn count_swaps(&self) -> IndexerResult<u64>;

    // ---- cursor and reorg bookkeeping ----

    /// The singleton cursor, if it was ever written.
    async fn get_cursor(&self) -> IndexerResult<Option<IndexerCursor>>;

    /// Write the singleton cursor.
    async fn set_cursor(&self, last_block: u64) -> IndexerResult<()>;

    /// Delete the cursor, so nothing counts as indexed.
    async fn clear_cursor(&self) -> IndexerResult<()>;

    /// Upsert block hashes.
    async fn record_block_hashes(&self, blocks: &[BlockHashRecord]) -> IndexerResult<()>;

    /// Stored block hashes in `[from, to]`, ascending by number.
    async fn block_hashes_between(&self, from: u64, to: u64)
        -> IndexerResult<Vec<BlockHashRecord>>;

    /// Highest stored block hash strictly below `block`.
    async fn latest_block_hash_before(&self, block: u64) -> IndexerResult<Option<BlockHashRecord>>;

    /// Remove everything attributable to blocks `>= block` and rewind the cursor
    /// to `block - 1`, atomically.
    async fn rollback_from_block(&self, block: u64) -> IndexerResult<RollbackSummary>;

    // ---- statistics ----

    /// Signed amounts of `token` over all its pools' swaps since `since`.
    async fn token_swap_amounts_since(&self, token: &str, since: i64)
        -> IndexerResult<Vec<String>>;

    /// Swap amounts of one pool since `since`.
    async fn pool_swap_amounts_since(
        &self,
        pool: &str,
        since: i64,
    ) -> IndexerResult<Vec<SwapAmountRow>>;

    /// Append token statistics in one transaction.
    async fn insert_token_statistics(&self, stats: &[TokenStatistic]) -> IndexerResult<()>;

    /// Append pool statistics in one transaction.
    async fn insert_pool_statistics(&self, stats: &[PoolStatistic]) -> IndexerResult<()>;

    /// All token statistics created at or after `since`, oldest first.
    async fn token_statistics_since(&self, since: i64) -> IndexerResult<Vec<TokenStatistic>>;

    /// Most recent statistic of `token` created at or before `at`.
    async fn token_statistic_at_or_before(
        &self,
        token: &str,
        at: i64,
    ) -> IndexerResult<Option<TokenStatistic>>;

    /// Most recent statistic of `token`.
    async fn latest_token_statistic(&self, token: &str) -> IndexerResult<Option<TokenStatistic>>;

    /// Cheap liveness query.
    async fn health_check(&self) -> IndexerResult<()>;
}
