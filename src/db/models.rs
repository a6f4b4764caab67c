//! Database models that map to SQL tables.
//!
//! Row structs keep the SQLite representation (hex strings, decimal TEXT,
//! `i64` integers). Conversion helpers turn them into alloy / decimal types
//! where the pipeline needs them.

use alloy::primitives::{hex, Address, B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{IndexerError, IndexerResult};

/// Id of the single cursor row.
pub const CURSOR_ID: &str = "singleton";

/// Lowercase `0x` hex form used as the storage key for addresses.
#[must_use]
pub fn address_key(address: &Address) -> String {
    hex::encode_prefixed(address)
}

/// Lowercase `0x` hex form used for hashes.
#[must_use]
pub fn hash_key(hash: &B256) -> String {
    hex::encode_prefixed(hash)
}

/// Current unix time in seconds.
#[must_use]
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_stored_address(value: &str) -> IndexerResult<Address> {
    Address::from_str(value).map_err(|e| {
        IndexerError::state(format!("stored address is malformed: {value}"), Some(Box::new(e)))
    })
}

/// A token, seeded externally.
///
/// Maps to the `tokens` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenRecord {
    /// Token contract address
    pub address: String,
    /// Ticker symbol
    pub symbol: String,
    /// Display name
    pub name: String,
    /// ERC-20 decimals
    pub decimals: i64,
    /// Oracle id; present for reference tokens
    pub coingecko_id: Option<String>,
    /// JSON array of tags
    pub tags: String,
    /// Unix timestamp when record was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

impl TokenRecord {
    /// Creates a token record stamped with the current time.
    #[must_use]
    pub fn new(
        address: Address,
        symbol: impl Into<String>,
        name: impl Into<String>,
        decimals: u8,
        coingecko_id: Option<String>,
    ) -> Self {
        let now = now_ts();
        Self {
            address: address_key(&address),
            symbol: symbol.into(),
            name: name.into(),
            decimals: i64::from(decimals),
            coingecko_id,
            tags: "[]".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Token address.
    ///
    /// # Errors
    ///
    /// Fails if the stored value is not a valid address.
    pub fn address(&self) -> IndexerResult<Address> {
        parse_stored_address(&self.address)
    }

    /// Decimals as `u8`, clamped to the ERC-20 range.
    #[must_use]
    pub fn decimals_u8(&self) -> u8 {
        u8::try_from(self.decimals.clamp(0, 255)).unwrap_or_default()
    }

    /// Whether the token is priced by the oracle.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.coingecko_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// A tracked pool.
///
/// Maps to the `pools` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PoolRecord {
    /// Pool contract address
    pub address: String,
    /// Token0 address
    pub token0: String,
    /// Token1 address
    pub token1: String,
    /// Fee tier in hundredths of a basis point (3000 = 0.30%)
    pub fee: i64,
    /// Tick spacing, when it was read from the factory event
    pub tick_spacing: Option<i64>,
    /// Latest sqrtPriceX96 as a decimal string
    pub sqrt_price_x96: Option<String>,
    /// Latest in-range liquidity as a decimal string
    pub liquidity: String,
    /// Latest tick
    pub tick: Option<i64>,
    /// Block of the factory event; `None` for manual adds
    pub created_block: Option<i64>,
    /// Removed pools are kept but deactivated
    pub is_active: bool,
    /// Unix timestamp when record was created
    pub created_at: i64,
    /// Unix timestamp of the last state update
    pub updated_at: i64,
    /// Block of the swap the cached state comes from
    pub state_block: Option<i64>,
    /// Log index of that swap
    pub state_log_index: Option<i64>,
}

impl PoolRecord {
    /// Pool address.
    ///
    /// # Errors
    ///
    /// Fails if the stored value is not a valid address.
    pub fn address(&self) -> IndexerResult<Address> {
        parse_stored_address(&self.address)
    }

    /// Latest sqrtPriceX96, `None` if unknown, malformed or zero.
    #[must_use]
    pub fn sqrt_price(&self) -> Option<U256> {
        self.sqrt_price_x96
            .as_deref()
            .and_then(|s| U256::from_str(s).ok())
            .filter(|v| !v.is_zero())
    }

    /// Latest liquidity, zero when malformed.
    #[must_use]
    pub fn liquidity_u128(&self) -> u128 {
        self.liquidity.parse().unwrap_or_default()
    }

    /// The other side of the pool, if `token` is one of its tokens.
    #[must_use]
    pub fn counterpart(&self, token: &str) -> Option<&str> {
        if self.token0 == token {
            Some(&self.token1)
        } else if self.token1 == token {
            Some(&self.token0)
        } else {
            None
        }
    }
}

/// Values needed to insert a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPool {
    /// Pool contract address
    pub address: Address,
    /// Token0 address
    pub token0: Address,
    /// Token1 address
    pub token1: Address,
    /// Fee tier
    pub fee: u32,
    /// Tick spacing if known
    pub tick_spacing: Option<i32>,
    /// Initial sqrtPriceX96 if known
    pub sqrt_price_x96: Option<U256>,
    /// Initial liquidity
    pub liquidity: u128,
    /// Initial tick if known
    pub tick: Option<i32>,
    /// Factory event block, `None` for manual adds
    pub created_block: Option<u64>,
}

/// Cached pool state written after each swap batch.
///
/// `(block_number, log_index)` locates the swap it was taken from; storage
/// only applies an update that is newer than the one already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStateUpdate {
    /// sqrtPriceX96 after the swap
    pub sqrt_price_x96: U256,
    /// In-range liquidity after the swap
    pub liquidity: u128,
    /// Tick after the swap
    pub tick: i32,
    /// Block of the swap
    pub block_number: u64,
    /// Log index of the swap
    pub log_index: u64,
}

/// Outcome of a pool insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolInsertOutcome {
    /// A new row was written
    Created,
    /// An active pool with this address already exists
    AlreadyExists,
    /// A deactivated pool was switched back on
    Reactivated,
    /// One of the tokens is not in storage
    MissingToken,
}

/// A swap row.
///
/// Maps to the `swaps` table; `(transaction_hash, log_index)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SwapRecord {
    /// Transaction hash
    pub transaction_hash: String,
    /// Log index within the block
    pub log_index: i64,
    /// Owning pool
    pub pool_address: String,
    /// Block number
    pub block_number: i64,
    /// Swap sender
    pub sender: String,
    /// Swap recipient
    pub recipient: String,
    /// Signed token0 delta as a decimal string
    pub amount0: String,
    /// Signed token1 delta as a decimal string
    pub amount1: String,
    /// sqrtPriceX96 after the swap
    pub sqrt_price_x96: String,
    /// Liquidity after the swap
    pub liquidity: String,
    /// Tick after the swap
    pub tick: i64,
    /// Gas used by the transaction
    pub gas_used: Option<String>,
    /// Effective gas price of the transaction
    pub gas_price: Option<String>,
    /// Block timestamp
    pub timestamp: i64,
    /// Unix timestamp when the row was written
    pub created_at: i64,
}

impl SwapRecord {
    /// Pool state implied by this swap.
    #[must_use]
    pub fn pool_state(&self) -> Option<PoolStateUpdate> {
        Some(PoolStateUpdate {
            sqrt_price_x96: U256::from_str(&self.sqrt_price_x96).ok()?,
            liquidity: self.liquidity.parse().ok()?,
            tick: i32::try_from(self.tick).ok()?,
            block_number: u64::try_from(self.block_number).ok()?,
            log_index: u64::try_from(self.log_index).ok()?,
        })
    }
}

/// Liquidity change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityKind {
    /// Position minted
    Mint,
    /// Position burned
    Burn,
}

impl LiquidityKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Burn => "burn",
        }
    }
}

/// A Mint or Burn row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LiquidityEventRecord {
    /// Transaction hash
    pub transaction_hash: String,
    /// Log index within the block
    pub log_index: i64,
    /// Owning pool
    pub pool_address: String,
    /// Block number
    pub block_number: i64,
    /// `mint` or `burn`
    pub kind: String,
    /// Position owner
    pub owner: String,
    /// Lower tick of the position
    pub tick_lower: i64,
    /// Upper tick of the position
    pub tick_upper: i64,
    /// Liquidity delta
    pub amount: String,
    /// Token0 amount
    pub amount0: String,
    /// Token1 amount
    pub amount1: String,
    /// Block timestamp if known
    pub timestamp: Option<i64>,
    /// Unix timestamp when the row was written
    pub created_at: i64,
}

/// The singleton scan cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndexerCursor {
    /// Last fully processed block
    pub last_block: i64,
    /// Unix timestamp of the last write
    pub last_update: i64,
}

impl IndexerCursor {
    /// Last block as `u64`.
    #[must_use]
    pub fn last_block_u64(&self) -> u64 {
        u64::try_from(self.last_block).unwrap_or_default()
    }
}

/// Stored block hash used for reorg detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashRecord {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Parent block hash
    pub parent_hash: B256,
    /// Block timestamp (unix seconds)
    pub timestamp: u64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BlockHashRow {
    pub block_number: i64,
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
}

impl TryFrom<BlockHashRow> for BlockHashRecord {
    type Error = IndexerError;

    fn try_from(row: BlockHashRow) -> Result<Self, Self::Error> {
        let parse = |value: &str| {
            B256::from_str(value).map_err(|e| {
                IndexerError::state(format!("stored block hash is malformed: {value}"), Some(Box::new(e)))
            })
        };
        Ok(Self {
            number: u64::try_from(row.block_number).unwrap_or_default(),
            hash: parse(&row.block_hash)?,
            parent_hash: parse(&row.parent_hash)?,
            timestamp: u64::try_from(row.timestamp).unwrap_or_default(),
        })
    }
}

/// Counts of rows touched by a reorg rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Swaps deleted
    pub swaps_deleted: u64,
    /// Mint/Burn rows deleted
    pub liquidity_events_deleted: u64,
    /// Pools created on the orphaned branch
    pub pools_deleted: u64,
    /// Pools whose cached state was restored
    pub pools_restored: u64,
    /// Cursor value after the rollback
    pub cursor: u64,
}

/// One price snapshot for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenStatistic {
    /// Token address
    pub token_address: String,
    /// USD price as a decimal string
    pub price_usd: String,
    /// Percent change over one hour
    pub price_change_1h: Option<String>,
    /// Percent change over 24 hours
    pub price_change_24h: Option<String>,
    /// 24h volume in token units
    pub volume_24h: String,
    /// 24h volume in USD
    pub volume_24h_usd: String,
    /// Snapshot time
    pub created_at: i64,
}

impl TokenStatistic {
    /// Stored price, `None` when malformed.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        Decimal::from_str(&self.price_usd).ok()
    }
}

/// One snapshot for a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PoolStatistic {
    /// Pool address
    pub pool_address: String,
    /// Total value locked in USD
    pub tvl_usd: String,
    /// 24h volume in USD
    pub volume_24h_usd: String,
    /// 24h fees in USD
    pub fees_24h_usd: String,
    /// Annualised fee yield in percent
    pub apr: String,
    /// Snapshot time
    pub created_at: i64,
}

/// Swap amounts of one pool, for pool volume aggregation.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SwapAmountRow {
    /// Signed token0 delta
    pub amount0: String,
    /// Signed token1 delta
    pub amount1: String,
}
