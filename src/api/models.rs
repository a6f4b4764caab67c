//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::{PoolRecord, TokenStatistic};
use crate::indexer::ScanStatus;

/// Scanner status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// A scan or reindex is running
    pub is_running: bool,
    /// Scanning is paused
    pub is_paused: bool,
    /// Chain head, absent if the node is unreachable
    pub current_chain_block: Option<u64>,
    /// Cursor position
    pub last_indexed_block: Option<u64>,
    /// Head minus cursor
    pub blocks_behind: Option<u64>,
    /// Last cursor write (ISO 8601)
    pub last_update: Option<DateTime<Utc>>,
    /// Node reachable and lag within bounds
    pub is_healthy: bool,
    /// Reorgs recovered since start
    pub reorgs_recovered: u64,
}

impl From<ScanStatus> for StatusResponse {
    fn from(status: ScanStatus) -> Self {
        Self {
            is_running: status.is_running,
            is_paused: status.is_paused,
            current_chain_block: status.current_chain_block,
            last_indexed_block: status.last_indexed_block,
            blocks_behind: status.blocks_behind,
            last_update: status
                .last_update
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            is_healthy: status.is_healthy,
            reorgs_recovered: status.reorgs_recovered,
        }
    }
}

/// Plain acknowledgement for management operations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    /// What happened
    pub message: String,
}

impl MessageResponse {
    /// Creates a response from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of `POST /reindex`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReindexRequest {
    /// First block to rescan
    pub block_number: u64,
}

/// Body of `POST /pools`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddPoolRequest {
    /// Pool contract address (`0x` + 40 hex chars)
    pub address: String,
}

/// Result of `POST /pools`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddPoolResponse {
    /// Pool address
    pub address: String,
    /// `added`, `reactivated` or `already_tracked`
    pub outcome: String,
}

/// A tracked pool.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PoolInfo {
    /// Pool contract address
    pub address: String,
    /// Token0 address
    pub token0: String,
    /// Token1 address
    pub token1: String,
    /// Fee tier in hundredths of a basis point
    pub fee: i64,
    /// Latest sqrtPriceX96, absent until the first swap
    pub sqrt_price_x96: Option<String>,
    /// Latest in-range liquidity
    pub liquidity: String,
    /// Latest tick
    pub tick: Option<i64>,
    /// Block of the factory event; absent for manual adds
    pub created_block: Option<i64>,
}

impl From<PoolRecord> for PoolInfo {
    fn from(pool: PoolRecord) -> Self {
        Self {
            address: pool.address,
            token0: pool.token0,
            token1: pool.token1,
            fee: pool.fee,
            sqrt_price_x96: pool.sqrt_price_x96,
            liquidity: pool.liquidity,
            tick: pool.tick,
            created_block: pool.created_block,
        }
    }
}

/// Latest USD price of a token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPriceResponse {
    /// Token address
    pub token: String,
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
    /// When the price was computed (ISO 8601)
    pub computed_at: DateTime<Utc>,
}

impl From<TokenStatistic> for TokenPriceResponse {
    fn from(stat: TokenStatistic) -> Self {
        Self {
            token: stat.token_address,
            price_usd: stat.price_usd,
            price_change_1h: stat.price_change_1h,
            price_change_24h: stat.price_change_24h,
            volume_24h: stat.volume_24h,
            volume_24h_usd: stat.volume_24h_usd,
            computed_at: DateTime::from_timestamp(stat.created_at, 0).unwrap_or_default(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall health status
    pub status: HealthStatus,
    /// Application version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Last indexed block number
    pub indexed_block: Option<u64>,
    /// Database status
    pub database_status: HealthStatus,
    /// Indexer lag status
    pub indexer_status: HealthStatus,
}

/// Health status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All services healthy
    Healthy,
    /// Partial degradation
    Degraded,
    /// Unhealthy state
    Unhealthy,
}

/// Error response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error type
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
