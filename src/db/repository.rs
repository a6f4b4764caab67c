//! SQLite implementation of [`StorageGateway`].
//!
//! Multi-row writes (swap batches, statistics, rollbacks) run inside a single
//! transaction so a failure aborts only the affected batch.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, instrument, warn};

use super::gateway::StorageGateway;
use super::models::{
    address_key, hash_key, now_ts, BlockHashRecord, BlockHashRow, IndexerCursor,
    LiquidityEventRecord, NewPool, PoolInsertOutcome, PoolRecord, PoolStateUpdate, PoolStatistic,
    RollbackSummary, SwapAmountRow, SwapRecord, TokenRecord, TokenStatistic, CURSOR_ID,
};
use crate::error::{IndexerError, IndexerResult};

/// Repository for database operations.
///
/// Wraps a SQLite connection pool. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> IndexerError {
    move |e| IndexerError::database(context, Some(Box::new(e)))
}

/// SQLite integers are signed; block numbers never get near `i64::MAX`.
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const POOL_COLUMNS: &str = "address, token0, token1, fee, tick_spacing, sqrt_price_x96, \
     liquidity, tick, created_block, is_active, created_at, updated_at, state_block, \
     state_log_index";

const SWAP_COLUMNS: &str = "transaction_hash, log_index, pool_address, block_number, sender, \
     recipient, amount0, amount1, sqrt_price_x96, liquidity, tick, gas_used, gas_price, \
     timestamp, created_at";

const TOKEN_STAT_COLUMNS: &str = "token_address, price_usd, price_change_1h, price_change_24h, \
     volume_24h, volume_24h_usd, created_at";

impl Repository {
    /// Creates a new repository with the given connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin(&self) -> IndexerResult<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to start transaction"))
    }

    async fn write_cursor(tx: &mut Transaction<'_, Sqlite>, last_block: u64) -> IndexerResult<()> {
        sqlx::query(
            r"
            INSERT INTO indexer_cursor (id, last_block, last_update)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                last_block = excluded.last_block,
                last_update = excluded.last_update
            ",
        )
        .bind(CURSOR_ID)
        .bind(to_i64(last_block))
        .bind(now_ts())
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write indexer cursor"))?;
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for Repository {
    // ==================== TOKEN OPERATIONS ====================

    async fn upsert_token(&self, token: &TokenRecord) -> IndexerResult<()> {
        sqlx::query(
            r"
            INSERT INTO tokens (address, symbol, name, decimals, coingecko_id, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (address) DO UPDATE SET
                symbol = excluded.symbol,
                name = excluded.name,
                coingecko_id = excluded.coingecko_id,
                tags = excluded.tags,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&token.address)
        .bind(&token.symbol)
        .bind(&token.name)
        .bind(token.decimals)
        .bind(&token.coingecko_id)
        .bind(&token.tags)
        .bind(token.created_at)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to upsert token"))?;
        Ok(())
    }

    async fn get_token(&self, address: &Address) -> IndexerResult<Option<TokenRecord>> {
        sqlx::query_as::<_, TokenRecord>("SELECT * FROM tokens WHERE address = ?")
            .bind(address_key(address))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to query token"))
    }

    async fn list_pooled_tokens(&self) -> IndexerResult<Vec<TokenRecord>> {
        sqlx::query_as::<_, TokenRecord>(
            r"
            SELECT * FROM tokens
            WHERE address IN (
                SELECT token0 FROM pools WHERE is_active = 1
                UNION
                SELECT token1 FROM pools WHERE is_active = 1
            )
            ORDER BY address
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list pooled tokens"))
    }

    // ==================== POOL OPERATIONS ====================

    async fn get_pool(&self, address: &Address) -> IndexerResult<Option<PoolRecord>> {
        sqlx::query_as::<_, PoolRecord>(&format!(
            "SELECT {POOL_COLUMNS} FROM pools WHERE address = ?"
        ))
        .bind(address_key(address))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to query pool by address"))
    }

    async fn list_active_pools(&self) -> IndexerResult<Vec<PoolRecord>> {
        sqlx::query_as::<_, PoolRecord>(&format!(
            "SELECT {POOL_COLUMNS} FROM pools WHERE is_active = 1 ORDER BY address"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list pools"))
    }

    #[instrument(skip(self, pool), fields(pool = %pool.address))]
    async fn insert_pool(&self, pool: &NewPool) -> IndexerResult<PoolInsertOutcome> {
        let address = address_key(&pool.address);
        let mut tx = self.begin().await?;

        let existing: Option<(bool,)> =
            sqlx::query_as("SELECT is_active FROM pools WHERE address = ?")
                .bind(&address)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to query existing pool"))?;

        let outcome = match existing {
            Some((true,)) => PoolInsertOutcome::AlreadyExists,
            Some((false,)) => {
                sqlx::query("UPDATE pools SET is_active = 1, updated_at = ? WHERE address = ?")
                    .bind(now_ts())
                    .bind(&address)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("Failed to reactivate pool"))?;
                PoolInsertOutcome::Reactivated
            }
            None => {
                let (token_count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM tokens WHERE address IN (?, ?)")
                        .bind(address_key(&pool.token0))
                        .bind(address_key(&pool.token1))
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(db_error("Failed to check pool tokens"))?;

                if token_count < 2 || pool.token0 == pool.token1 {
                    PoolInsertOutcome::MissingToken
                } else {
                    let now = now_ts();
                    sqlx::query(
                        r"
                        INSERT INTO pools (
                            address, token0, token1, fee, tick_spacing, sqrt_price_x96,
                            liquidity, tick, created_block, is_active, created_at, updated_at
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                        ",
                    )
                    .bind(&address)
                    .bind(address_key(&pool.token0))
                    .bind(address_key(&pool.token1))
                    .bind(i64::from(pool.fee))
                    .bind(pool.tick_spacing.map(i64::from))
                    .bind(pool.sqrt_price_x96.map(|v| v.to_string()))
                    .bind(pool.liquidity.to_string())
                    .bind(pool.tick.map(i64::from))
                    .bind(pool.created_block.map(to_i64))
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("Failed to insert pool"))?;
                    PoolInsertOutcome::Created
                }
            }
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit pool insert"))?;

        debug!(?outcome, "Pool insert finished");
        Ok(outcome)
    }

    async fn deactivate_pool(&self, address: &Address) -> IndexerResult<bool> {
        let result =
            sqlx::query("UPDATE pools SET is_active = 0, updated_at = ? WHERE address = ? AND is_active = 1")
                .bind(now_ts())
                .bind(address_key(address))
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to deactivate pool"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_pool_state(
        &self,
        address: &Address,
        state: &PoolStateUpdate,
    ) -> IndexerResult<bool> {
        let block = to_i64(state.block_number);
        let log_index = to_i64(state.log_index);
        let result = sqlx::query(
            r"
            UPDATE pools
            SET sqrt_price_x96 = ?, liquidity = ?, tick = ?, state_block = ?,
                state_log_index = ?, updated_at = ?
            WHERE address = ?
              AND (state_block IS NULL
                   OR state_block < ?
                   OR (state_block = ? AND state_log_index < ?))
            ",
        )
        .bind(state.sqrt_price_x96.to_string())
        .bind(state.liquidity.to_string())
        .bind(i64::from(state.tick))
        .bind(block)
        .bind(log_index)
        .bind(now_ts())
        .bind(address_key(address))
        .bind(block)
        .bind(block)
        .bind(log_index)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update pool state"))?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== EVENT OPERATIONS ====================

    #[instrument(skip(self, swaps), fields(count = swaps.len(), duration_ms = tracing::field::Empty))]
    async fn upsert_swaps(&self, swaps: &[SwapRecord]) -> IndexerResult<usize> {
        if swaps.is_empty() {
            return Ok(0);
        }

        let start = std::time::Instant::now();
        let mut tx = self.begin().await?;
        let mut written = 0_usize;

        for swap in swaps {
            let result = sqlx::query(&format!(
                r"
                INSERT INTO swaps ({SWAP_COLUMNS})
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (transaction_hash, log_index) DO UPDATE SET
                    timestamp = excluded.timestamp
                "
            ))
            .bind(&swap.transaction_hash)
            .bind(swap.log_index)
            .bind(&swap.pool_address)
            .bind(swap.block_number)
            .bind(&swap.sender)
            .bind(&swap.recipient)
            .bind(&swap.amount0)
            .bind(&swap.amount1)
            .bind(&swap.sqrt_price_x96)
            .bind(&swap.liquidity)
            .bind(swap.tick)
            .bind(&swap.gas_used)
            .bind(&swap.gas_price)
            .bind(swap.timestamp)
            .bind(swap.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                IndexerError::database(
                    format!(
                        "Failed to upsert swap {}:{}",
                        swap.transaction_hash, swap.log_index
                    ),
                    Some(Box::new(e)),
                )
            })?;
            written += usize::try_from(result.rows_affected()).unwrap_or_default();
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit swap batch"))?;

        let duration = start.elapsed();
        tracing::Span::current().record("duration_ms", duration.as_millis() as u64);
        debug!(written, "Swap batch committed");
        Ok(written)
    }

    async fn upsert_liquidity_events(
        &self,
        events: &[LiquidityEventRecord],
    ) -> IndexerResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin().await?;
        let mut written = 0_usize;

        for event in events {
            let result = sqlx::query(
                r"
                INSERT INTO liquidity_events (
                    transaction_hash, log_index, pool_address, block_number, kind, owner,
                    tick_lower, tick_upper, amount, amount0, amount1, timestamp, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (transaction_hash, log_index) DO UPDATE SET
                    timestamp = excluded.timestamp
                ",
            )
            .bind(&event.transaction_hash)
            .bind(event.log_index)
            .bind(&event.pool_address)
            .bind(event.block_number)
            .bind(&event.kind)
            .bind(&event.owner)
            .bind(event.tick_lower)
            .bind(event.tick_upper)
            .bind(&event.amount)
            .bind(&event.amount0)
            .bind(&event.amount1)
            .bind(event.timestamp)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to upsert liquidity event"))?;
            written += usize::try_from(result.rows_affected()).unwrap_or_default();
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit liquidity event batch"))?;
        Ok(written)
    }

    async fn delete_event(&self, transaction_hash: &B256, log_index: u64) -> IndexerResult<u64> {
        let hash = hash_key(transaction_hash);
        let index = to_i64(log_index);
        let mut tx = self.begin().await?;

        let swaps = sqlx::query("DELETE FROM swaps WHERE transaction_hash = ? AND log_index = ?")
            .bind(&hash)
            .bind(index)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete swap"))?
            .rows_affected();
        let liquidity = sqlx::query(
            "DELETE FROM liquidity_events WHERE transaction_hash = ? AND log_index = ?",
        )
        .bind(&hash)
        .bind(index)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete liquidity event"))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(db_error("Failed to commit event deletion"))?;
        Ok(swaps + liquidity)
    }

    async fn get_swap(
        &self,
        transaction_hash: &B256,
        log_index: u64,
    ) -> IndexerResult<Option<SwapRecord>> {
        sqlx::query_as::<_, SwapRecord>(&format!(
            "SELECT {SWAP_COLUMNS} FROM swaps WHERE transaction_hash = ? AND log_index = ?"
        ))
        .bind(hash_key(transaction_hash))
        .bind(to_i64(log_index))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to query swap"))
    }

    async fn count_swaps(&self) -> IndexerResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM swaps")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count swaps"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    // ==================== CURSOR & REORG OPERATIONS ====================

    async fn get_cursor(&self) -> IndexerResult<Option<IndexerCursor>> {
        sqlx::query_as::<_, IndexerCursor>(
            "SELECT last_block, last_update FROM indexer_cursor WHERE id = ?",
        )
        .bind(CURSOR_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to read indexer cursor"))
    }

    async fn set_cursor(&self, last_block: u64) -> IndexerResult<()> {
        let mut tx = self.begin().await?;
        Self::write_cursor(&mut tx, last_block).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit indexer cursor"))
    }

    async fn clear_cursor(&self) -> IndexerResult<()> {
        sqlx::query("DELETE FROM indexer_cursor WHERE id = ?")
            .bind(CURSOR_ID)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to clear indexer cursor"))?;
        Ok(())
    }

    async fn record_block_hashes(&self, blocks: &[BlockHashRecord]) -> IndexerResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin().await?;
        for block in blocks {
            sqlx::query(
                r"
                INSERT INTO block_hashes (block_number, block_hash, parent_hash, timestamp)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (block_number) DO UPDATE SET
                    block_hash = excluded.block_hash,
                    parent_hash = excluded.parent_hash,
                    timestamp = excluded.timestamp
                ",
            )
            .bind(to_i64(block.number))
            .bind(hash_key(&block.hash))
            .bind(hash_key(&block.parent_hash))
            .bind(to_i64(block.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to record block hash"))?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit block hashes"))
    }

    async fn block_hashes_between(
        &self,
        from: u64,
        to: u64,
    ) -> IndexerResult<Vec<BlockHashRecord>> {
        let rows = sqlx::query_as::<_, BlockHashRow>(
            r"
            SELECT block_number, block_hash, parent_hash, timestamp
            FROM block_hashes
            WHERE block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC
            ",
        )
        .bind(to_i64(from))
        .bind(to_i64(to))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to read block hashes"))?;

        rows.into_iter().map(BlockHashRecord::try_from).collect()
    }

    async fn latest_block_hash_before(&self, block: u64) -> IndexerResult<Option<BlockHashRecord>> {
        let row = sqlx::query_as::<_, BlockHashRow>(
            r"
            SELECT block_number, block_hash, parent_hash, timestamp
            FROM block_hashes
            WHERE block_number < ?
            ORDER BY block_number DESC
            LIMIT 1
            ",
        )
        .bind(to_i64(block))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to read anchor block hash"))?;

        row.map(BlockHashRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn rollback_from_block(&self, block: u64) -> IndexerResult<RollbackSummary> {
        let from = to_i64(block);
        let mut tx = self.begin().await?;

        let affected: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT pool_address FROM swaps WHERE block_number >= ?",
        )
        .bind(from)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to collect pools touched by reorg"))?;

        let swaps_deleted = sqlx::query("DELETE FROM swaps WHERE block_number >= ?")
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete orphaned swaps"))?
            .rows_affected();

        let liquidity_events_deleted =
            sqlx::query("DELETE FROM liquidity_events WHERE block_number >= ?")
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to delete orphaned liquidity events"))?
                .rows_affected();

        let pools_deleted =
            sqlx::query("DELETE FROM pools WHERE created_block IS NOT NULL AND created_block >= ?")
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to delete orphaned pools"))?
                .rows_affected();

        let mut pools_restored = 0_u64;
        for (pool_address,) in affected {
            let latest = sqlx::query_as::<_, SwapRecord>(&format!(
                r"
                SELECT {SWAP_COLUMNS} FROM swaps
                WHERE pool_address = ?
                ORDER BY block_number DESC, log_index DESC
                LIMIT 1
                "
            ))
            .bind(&pool_address)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to read latest canonical swap"))?;

            let result = if let Some(swap) = latest {
                sqlx::query(
                    r"
                    UPDATE pools
                    SET sqrt_price_x96 = ?, liquidity = ?, tick = ?, state_block = ?,
                        state_log_index = ?, updated_at = ?
                    WHERE address = ?
                    ",
                )
                .bind(swap.sqrt_price_x96)
                .bind(swap.liquidity)
                .bind(swap.tick)
                .bind(swap.block_number)
                .bind(swap.log_index)
                .bind(now_ts())
                .bind(&pool_address)
                .execute(&mut *tx)
                .await
            } else {
                // No canonical swap left: the price is unknown until the next one.
                sqlx::query(
                    r"
                    UPDATE pools
                    SET sqrt_price_x96 = NULL, tick = NULL, state_block = NULL,
                        state_log_index = NULL, updated_at = ?
                    WHERE address = ?
                    ",
                )
                .bind(now_ts())
                .bind(&pool_address)
                .execute(&mut *tx)
                .await
            }
            .map_err(db_error("Failed to restore pool state"))?;
            pools_restored += result.rows_affected();
        }

        sqlx::query("DELETE FROM block_hashes WHERE block_number >= ?")
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete orphaned block hashes"))?;

        let cursor = block.saturating_sub(1);
        Self::write_cursor(&mut tx, cursor).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit reorg rollback"))?;

        let summary = RollbackSummary {
            swaps_deleted,
            liquidity_events_deleted,
            pools_deleted,
            pools_restored,
            cursor,
        };
        warn!(?summary, "Rolled back orphaned blocks");
        Ok(summary)
    }

    // ==================== STATISTICS OPERATIONS ====================

    async fn token_swap_amounts_since(
        &self,
        token: &str,
        since: i64,
    ) -> IndexerResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r"
            SELECT CASE WHEN p.token0 = ? THEN s.amount0 ELSE s.amount1 END AS amount
            FROM swaps s
            JOIN pools p ON p.address = s.pool_address
            WHERE (p.token0 = ? OR p.token1 = ?) AND s.timestamp >= ?
            ",
        )
        .bind(token)
        .bind(token)
        .bind(token)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to aggregate token volume"))?;

        Ok(rows.into_iter().map(|(amount,)| amount).collect())
    }

    async fn pool_swap_amounts_since(
        &self,
        pool: &str,
        since: i64,
    ) -> IndexerResult<Vec<SwapAmountRow>> {
        sqlx::query_as::<_, SwapAmountRow>(
            "SELECT amount0, amount1 FROM swaps WHERE pool_address = ? AND timestamp >= ?",
        )
        .bind(pool)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to aggregate pool volume"))
    }

    #[instrument(skip(self, stats), fields(count = stats.len()))]
    async fn insert_token_statistics(&self, stats: &[TokenStatistic]) -> IndexerResult<()> {
        if stats.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin().await?;
        for stat in stats {
            sqlx::query(&format!(
                "INSERT INTO token_statistics ({TOKEN_STAT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&stat.token_address)
            .bind(&stat.price_usd)
            .bind(&stat.price_change_1h)
            .bind(&stat.price_change_24h)
            .bind(&stat.volume_24h)
            .bind(&stat.volume_24h_usd)
            .bind(stat.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert token statistic"))?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit token statistics"))?;

        info!(count = stats.len(), "Token statistics persisted");
        Ok(())
    }

    async fn insert_pool_statistics(&self, stats: &[PoolStatistic]) -> IndexerResult<()> {
        if stats.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin().await?;
        for stat in stats {
            sqlx::query(
                r"
                INSERT INTO pool_statistics (pool_address, tvl_usd, volume_24h_usd, fees_24h_usd, apr, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&stat.pool_address)
            .bind(&stat.tvl_usd)
            .bind(&stat.volume_24h_usd)
            .bind(&stat.fees_24h_usd)
            .bind(&stat.apr)
            .bind(stat.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert pool statistic"))?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit pool statistics"))
    }

    async fn token_statistics_since(&self, since: i64) -> IndexerResult<Vec<TokenStatistic>> {
        sqlx::query_as::<_, TokenStatistic>(&format!(
            r"
            SELECT {TOKEN_STAT_COLUMNS} FROM token_statistics
            WHERE created_at >= ?
            ORDER BY token_address, created_at ASC, id ASC
            "
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to prefetch token statistics"))
    }

    async fn token_statistic_at_or_before(
        &self,
        token: &str,
        at: i64,
    ) -> IndexerResult<Option<TokenStatistic>> {
        sqlx::query_as::<_, TokenStatistic>(&format!(
            r"
            SELECT {TOKEN_STAT_COLUMNS} FROM token_statistics
            WHERE token_address = ? AND created_at <= ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        ))
        .bind(token)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to query historical token statistic"))
    }

    async fn latest_token_statistic(&self, token: &str) -> IndexerResult<Option<TokenStatistic>> {
        sqlx::query_as::<_, TokenStatistic>(&format!(
            r"
            SELECT {TOKEN_STAT_COLUMNS} FROM token_statistics
            WHERE token_address = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to query latest token statistic"))
    }

    async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Database health check failed"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use alloy::primitives::{address, b256, U256};

    const TOKEN_A: Address = address!("00000000000000000000000000000000000000a1");
    const TOKEN_B: Address = address!("00000000000000000000000000000000000000b2");
    const POOL: Address = address!("0000000000000000000000000000000000000f01");

    async fn setup_test_db() -> Repository {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        let repo = Repository::new(pool);
        repo.upsert_token(&TokenRecord::new(TOKEN_A, "AAA", "Token A", 18, None))
            .await
            .expect("token a");
        repo.upsert_token(&TokenRecord::new(TOKEN_B, "BBB", "Token B", 6, None))
            .await
            .expect("token b");
        repo
    }

    fn new_pool(address: Address, created_block: Option<u64>) -> NewPool {
        NewPool {
            address,
            token0: TOKEN_A,
            token1: TOKEN_B,
            fee: 3000,
            tick_spacing: Some(60),
            sqrt_price_x96: None,
            liquidity: 0,
            tick: None,
            created_block,
        }
    }

    fn swap(hash: B256, log_index: i64, block: i64, timestamp: i64) -> SwapRecord {
        SwapRecord {
            transaction_hash: hash_key(&hash),
            log_index,
            pool_address: address_key(&POOL),
            block_number: block,
            sender: address_key(&TOKEN_A),
            recipient: address_key(&TOKEN_B),
            amount0: "-1000".into(),
            amount1: "2000".into(),
            sqrt_price_x96: (U256::from(1) << 96_usize).to_string(),
            liquidity: block.to_string(),
            tick: block,
            gas_used: Some("21000".into()),
            gas_price: None,
            timestamp,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_pool_requires_tokens() {
        let repo = setup_test_db().await;
        let mut pool = new_pool(POOL, Some(10));
        pool.token1 = address!("00000000000000000000000000000000000000c3");

        let outcome = repo.insert_pool(&pool).await.expect("insert");
        assert_eq!(outcome, PoolInsertOutcome::MissingToken);
        assert!(repo.get_pool(&POOL).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn test_insert_pool_idempotent_and_reactivation() {
        let repo = setup_test_db().await;
        let pool = new_pool(POOL, Some(10));

        assert_eq!(repo.insert_pool(&pool).await.expect("first"), PoolInsertOutcome::Created);
        assert_eq!(
            repo.insert_pool(&pool).await.expect("second"),
            PoolInsertOutcome::AlreadyExists
        );
        assert!(repo.deactivate_pool(&POOL).await.expect("deactivate"));
        assert!(repo.list_active_pools().await.expect("list").is_empty());
        assert_eq!(
            repo.insert_pool(&pool).await.expect("third"),
            PoolInsertOutcome::Reactivated
        );
        assert_eq!(repo.list_active_pools().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_swap_upsert_is_idempotent() {
        let repo = setup_test_db().await;
        repo.insert_pool(&new_pool(POOL, Some(10))).await.expect("pool");

        let hash = b256!("0000000000000000000000000000000000000000000000000000000000000abc");
        repo.upsert_swaps(&[swap(hash, 3, 20, 1_000)]).await.expect("first");
        repo.upsert_swaps(&[swap(hash, 3, 20, 2_000)]).await.expect("second");

        assert_eq!(repo.count_swaps().await.expect("count"), 1);
        let stored = repo.get_swap(&hash, 3).await.expect("get").expect("exists");
        assert_eq!(stored.timestamp, 2_000);
        assert_eq!(stored.amount0, "-1000");
    }

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let repo = setup_test_db().await;
        assert!(repo.get_cursor().await.expect("read").is_none());

        repo.set_cursor(500).await.expect("write");
        repo.set_cursor(600).await.expect("write");
        let cursor = repo.get_cursor().await.expect("read").expect("exists");
        assert_eq!(cursor.last_block_u64(), 600);

        repo.clear_cursor().await.expect("clear");
        assert!(repo.get_cursor().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_older_swap_does_not_overwrite_pool_state() {
        let repo = setup_test_db().await;
        repo.insert_pool(&new_pool(POOL, Some(10))).await.expect("pool");
        let state = |block_number: u64, log_index: u64, tick: i32| PoolStateUpdate {
            sqrt_price_x96: U256::from(1) << 96,
            liquidity: 1,
            tick,
            block_number,
            log_index,
        };

        assert!(repo.update_pool_state(&POOL, &state(700, 3, 700)).await.expect("update"));
        assert!(!repo.update_pool_state(&POOL, &state(650, 9, 650)).await.expect("update"));
        assert!(!repo.update_pool_state(&POOL, &state(700, 3, 1)).await.expect("update"));
        assert!(!repo.update_pool_state(&POOL, &state(700, 2, 2)).await.expect("update"));

        let pool = repo.get_pool(&POOL).await.expect("query").expect("exists");
        assert_eq!(pool.tick, Some(700));
        assert_eq!((pool.state_block, pool.state_log_index), (Some(700), Some(3)));

        assert!(repo.update_pool_state(&POOL, &state(700, 4, 704)).await.expect("update"));
        let pool = repo.get_pool(&POOL).await.expect("query").expect("exists");
        assert_eq!(pool.tick, Some(704));
    }

    #[tokio::test]
    async fn test_rollback_removes_orphaned_rows_and_restores_state() {
        let repo = setup_test_db().await;
        repo.insert_pool(&new_pool(POOL, Some(10))).await.expect("pool");
        let late_pool = address!("0000000000000000000000000000000000000f02");
        repo.insert_pool(&new_pool(late_pool, Some(120))).await.expect("late pool");

        let h1 = b256!("0000000000000000000000000000000000000000000000000000000000000001");
        let h2 = b256!("0000000000000000000000000000000000000000000000000000000000000002");
        repo.upsert_swaps(&[swap(h1, 0, 100, 1), swap(h2, 0, 130, 2)])
            .await
            .expect("swaps");
        repo.update_pool_state(
            &POOL,
            &PoolStateUpdate {
                sqrt_price_x96: U256::from(1) << 96,
                liquidity: 130,
                tick: 130,
                block_number: 130,
                log_index: 0,
            },
        )
        .await
        .expect("state");
        repo.set_cursor(150).await.expect("cursor");

        let summary = repo.rollback_from_block(120).await.expect("rollback");
        assert_eq!(summary.swaps_deleted, 1);
        assert_eq!(summary.pools_deleted, 1);
        assert_eq!(summary.cursor, 119);

        assert_eq!(repo.count_swaps().await.expect("count"), 1);
        assert!(repo.get_pool(&late_pool).await.expect("query").is_none());
        let restored = repo.get_pool(&POOL).await.expect("query").expect("exists");
        assert_eq!(restored.liquidity, "100");
        assert_eq!(restored.tick, Some(100));
        assert_eq!((restored.state_block, restored.state_log_index), (Some(100), Some(0)));
        let cursor = repo.get_cursor().await.expect("read").expect("exists");
        assert_eq!(cursor.last_block_u64(), 119);
    }

    #[tokio::test]
    async fn test_token_volume_aggregate_picks_token_side() {
        let repo = setup_test_db().await;
        repo.insert_pool(&new_pool(POOL, Some(10))).await.expect("pool");
        let h1 = b256!("0000000000000000000000000000000000000000000000000000000000000001");
        let h2 = b256!("0000000000000000000000000000000000000000000000000000000000000002");
        repo.upsert_swaps(&[swap(h1, 0, 100, 50), swap(h2, 0, 101, 500)])
            .await
            .expect("swaps");

        let a = repo
            .token_swap_amounts_since(&address_key(&TOKEN_A), 100)
            .await
            .expect("aggregate");
        let b = repo
            .token_swap_amounts_since(&address_key(&TOKEN_B), 0)
            .await
            .expect("aggregate");
        assert_eq!(a, vec!["-1000".to_string()]);
        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|v| v == "2000"));
    }

    #[tokio::test]
    async fn test_statistic_lookup_at_or_before() {
        let repo = setup_test_db().await;
        let token = address_key(&TOKEN_A);
        let stat = |price: &str, at: i64| TokenStatistic {
            token_address: token.clone(),
            price_usd: price.into(),
            price_change_1h: None,
            price_change_24h: None,
            volume_24h: "0".into(),
            volume_24h_usd: "0".into(),
            created_at: at,
        };
        repo.insert_token_statistics(&[stat("1", 100), stat("2", 200), stat("3", 300)])
            .await
            .expect("insert");

        let found = repo
            .token_statistic_at_or_before(&token, 250)
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.price_usd, "2");
        assert!(repo
            .token_statistic_at_or_before(&token, 50)
            .await
            .expect("query")
            .is_none());
        assert_eq!(repo.token_statistics_since(200).await.expect("since").len(), 2);
        assert_eq!(
            repo.latest_token_statistic(&token)
                .await
                .expect("latest")
                .expect("exists")
                .price_usd,
            "3"
        );
    }
}
