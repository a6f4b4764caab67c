//! Configuration management for the pool indexer.
//!
//! Values are loaded from environment variables (with `.env` support through
//! `dotenvy`) and validated up front. All operations return [`IndexerResult`].
//!
//! ## Environment Variables
//!
//! Required:
//! - `RPC_URL`: HTTP(S) JSON-RPC endpoint
//!
//! Optional (with defaults):
//! - `WS_URL`: WebSocket endpoint for real-time log subscriptions (disabled if unset)
//! - `DATABASE_URL`: SQLite database (default: `sqlite:./indexer.db`)
//! - `FACTORY_ADDRESS`: pool factory (default: Uniswap V3 mainnet factory)
//! - `START_BLOCK`: cursor position used when no cursor exists yet (default: 0)
//! - `CONFIRMATIONS`: blocks behind head treated as final (default: 12)
//! - `BATCH_SIZE`: maximum blocks per scan batch (default: 100)
//! - `SCAN_INTERVAL_SECS`: scanner tick (default: 10)
//! - `PRICE_INTERVAL_SECS`: price resolution cadence (default: 60)
//! - `REORG_CHECK_DEPTH`: blocks behind the cursor checked for reorgs (default: 64)
//! - `REINDEX_DELAY_MS`: delay between reindex batches (default: 200)
//! - `RPC_TIMEOUT_SECS`: timeout for RPC and oracle calls (default: 10)
//! - `HEALTH_MAX_LAG`: blocks behind before status reports unhealthy (default: 100)
//! - `ORACLE_URL`: CoinGecko-compatible base URL
//! - `ORACLE_API_KEY`: optional oracle API key
//! - `API_PORT`: control API port (default: 3000)
//! - `API_RATE_LIMIT_RPM`: control API requests per minute (default: 120)
//! - `CORS_ORIGINS`: comma separated origins (default: `*`)
//!
//! ## Example
//!
//! ```no_run
//! use dex_pool_indexer::config::Config;
//! use dex_pool_indexer::error::IndexerResult;
//!
//! # fn main() -> IndexerResult<()> {
//! let config = Config::from_env()?;
//! println!("Scanning with {} confirmations", config.confirmations());
//! # Ok(())
//! # }
//! ```

use crate::error::{IndexerError, IndexerResult};
use alloy::primitives::Address;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Uniswap V3 factory on Ethereum mainnet.
pub const DEFAULT_FACTORY_ADDRESS: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";

/// Default CoinGecko API base URL.
pub const DEFAULT_ORACLE_URL: &str = "https://api.coingecko.com/api/v3";

/// Main configuration struct for the indexer.
#[derive(Debug, Clone)]
pub struct Config {
    rpc_url: String,
    ws_url: Option<String>,
    database_url: String,
    factory_address: Address,
    start_block: u64,
    confirmations: u64,
    batch_size: u64,
    scan_interval_secs: u64,
    price_interval_secs: u64,
    reorg_check_depth: u64,
    reindex_delay_ms: u64,
    rpc_timeout_secs: u64,
    health_max_lag: u64,
    oracle_url: String,
    oracle_api_key: Option<String>,
    api_port: u16,
    api_rate_limit_rpm: u32,
    cors_origins: Vec<String>,
}

/// Validate and parse an address of the form `0x` + 40 hex characters.
///
/// # Errors
///
/// Returns [`IndexerError::ValidationError`] for anything else.
///
/// # Example
///
/// ```
/// use dex_pool_indexer::config::parse_address;
///
/// assert!(parse_address("0x1F98431c8aD98523631AE4a59f267346ea31F984").is_ok());
/// assert!(parse_address("0x1234").is_err());
/// ```
pub fn parse_address(value: &str) -> IndexerResult<Address> {
    let trimmed = value.trim();
    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());

    if !valid {
        return Err(IndexerError::validation(format!(
            "expected an address of the form 0x + 40 hex chars, got: {trimmed}"
        )));
    }

    Address::from_str(trimmed)
        .map_err(|e| IndexerError::validation(format!("invalid address {trimmed}: {e}")))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `RPC_URL` is missing or any value fails to parse.
    pub fn from_env() -> IndexerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> IndexerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = lookup("RPC_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| IndexerError::config("RPC_URL environment variable is required", None))?;

        if !rpc_url.starts_with("http") {
            return Err(IndexerError::config(
                format!("RPC_URL must be an http(s) URL, got: {rpc_url}"),
                None,
            ));
        }

        let ws_url = lookup("WS_URL").filter(|v| !v.trim().is_empty());
        if let Some(ws) = &ws_url {
            if !ws.starts_with("ws") {
                return Err(IndexerError::config(
                    format!("WS_URL must be a ws(s) URL, got: {ws}"),
                    None,
                ));
            }
        }

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:./indexer.db".to_string());

        let factory_raw =
            lookup("FACTORY_ADDRESS").unwrap_or_else(|| DEFAULT_FACTORY_ADDRESS.to_string());
        let factory_address = parse_address(&factory_raw).map_err(|e| {
            IndexerError::config(
                format!("FACTORY_ADDRESS is invalid: {factory_raw}"),
                Some(Box::new(e)),
            )
        })?;

        let start_block = parse_var(&lookup, "START_BLOCK", 0_u64)?;
        let confirmations = parse_var(&lookup, "CONFIRMATIONS", 12_u64)?;
        let batch_size = parse_var(&lookup, "BATCH_SIZE", 100_u64)?;
        if batch_size == 0 {
            return Err(IndexerError::config("BATCH_SIZE must be at least 1", None));
        }
        let scan_interval_secs = parse_var(&lookup, "SCAN_INTERVAL_SECS", 10_u64)?.max(1);
        let price_interval_secs = parse_var(&lookup, "PRICE_INTERVAL_SECS", 60_u64)?.max(1);
        let reorg_check_depth = parse_var(&lookup, "REORG_CHECK_DEPTH", 64_u64)?;
        let reindex_delay_ms = parse_var(&lookup, "REINDEX_DELAY_MS", 200_u64)?;
        let rpc_timeout_secs = parse_var(&lookup, "RPC_TIMEOUT_SECS", 10_u64)?.max(1);
        let health_max_lag = parse_var(&lookup, "HEALTH_MAX_LAG", 100_u64)?;

        let oracle_url = lookup("ORACLE_URL")
            .unwrap_or_else(|| DEFAULT_ORACLE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let oracle_api_key = lookup("ORACLE_API_KEY").filter(|v| !v.trim().is_empty());

        let api_port = parse_var(&lookup, "API_PORT", 3000_u16)?;
        let api_rate_limit_rpm = parse_var(&lookup, "API_RATE_LIMIT_RPM", 120_u32)?;
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Self {
            rpc_url,
            ws_url,
            database_url,
            factory_address,
            start_block,
            confirmations,
            batch_size,
            scan_interval_secs,
            price_interval_secs,
            reorg_check_depth,
            reindex_delay_ms,
            rpc_timeout_secs,
            health_max_lag,
            oracle_url,
            oracle_api_key,
            api_port,
            api_rate_limit_rpm,
            cors_origins,
        })
    }

    /// HTTP JSON-RPC endpoint.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// WebSocket endpoint, if real-time subscriptions are enabled.
    #[must_use]
    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    /// SQLite database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Pool factory address.
    #[must_use]
    pub const fn factory_address(&self) -> Address {
        self.factory_address
    }

    /// Cursor position used when none is stored yet.
    #[must_use]
    pub const fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Confirmations required before a block is scanned.
    #[must_use]
    pub const fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Maximum blocks per scan batch.
    #[must_use]
    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Scanner tick interval.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Price resolution cadence.
    #[must_use]
    pub const fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs)
    }

    /// Blocks behind the cursor covered by the reorg check.
    #[must_use]
    pub const fn reorg_check_depth(&self) -> u64 {
        self.reorg_check_depth
    }

    /// Delay between reindex batches.
    #[must_use]
    pub const fn reindex_delay(&self) -> Duration {
        Duration::from_millis(self.reindex_delay_ms)
    }

    /// Timeout applied to every RPC and oracle call.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Blocks behind head tolerated before the status reports unhealthy.
    #[must_use]
    pub const fn health_max_lag(&self) -> u64 {
        self.health_max_lag
    }

    /// Oracle base URL without trailing slash.
    #[must_use]
    pub fn oracle_url(&self) -> &str {
        &self.oracle_url
    }

    /// Oracle API key.
    #[must_use]
    pub fn oracle_api_key(&self) -> Option<&str> {
        self.oracle_api_key.as_deref()
    }

    /// Control API port.
    #[must_use]
    pub const fn api_port(&self) -> u16 {
        self.api_port
    }

    /// Control API rate limit.
    #[must_use]
    pub const fn api_rate_limit_rpm(&self) -> u32 {
        self.api_rate_limit_rpm
    }

    /// Allowed CORS origins.
    #[must_use]
    pub fn cors_origins(&self) -> &[String] {
        &self.cors_origins
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> IndexerResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            IndexerError::config(format!("{key} has an invalid value: {raw}"), Some(Box::new(e)))
        }),
    }
}
