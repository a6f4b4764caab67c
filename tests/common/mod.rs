//! In-memory fakes for the chain and oracle gateways, plus log builders.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::aliases::{I24, U24};
use alloy::primitives::{address, Address, LogData, B256, I256, U160, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use rust_decimal::Decimal;

use dex_pool_indexer::db::models::TokenRecord;
use dex_pool_indexer::db::{create_pool, Repository, StorageGateway};
use dex_pool_indexer::error::{IndexerError, IndexerResult};
use dex_pool_indexer::events::{PoolCreated, Swap};
use dex_pool_indexer::oracle::PriceOracleGateway;
use dex_pool_indexer::rpc::{
    BlockHeader, ChainGateway, ChainLog, LogQuery, LogStream, OnChainPool, ReceiptSummary,
};

pub const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const WBTC: Address = address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599");
pub const DAI: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");

pub const USDC_WETH_POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");
pub const WBTC_USDC_POOL: Address = address!("99ac8cA7087fA4A2A1FB6357269965A2014ABc35");

/// Base block timestamp; block `n` is mined at `GENESIS_TIME + 12 * n`.
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Block hash for `number` on fork `fork`.
pub fn block_hash(number: u64, fork: u8) -> B256 {
    let mut bytes = [0_u8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    bytes[31] = fork;
    B256::from(bytes)
}

/// Scripted chain: a head, a set of logs and per-block fork markers.
#[derive(Default)]
pub struct MockChain {
    head: Mutex<u64>,
    logs: Mutex<Vec<ChainLog>>,
    forks: Mutex<HashMap<u64, u8>>,
    pools: Mutex<HashMap<Address, OnChainPool>>,
    fail_logs: AtomicBool,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        *chain.head.lock().unwrap() = head;
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }

    pub fn push_log(&self, log: ChainLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Replace every block from `from` onwards with fork `fork` and drop
    /// the logs that were mined on the old branch.
    pub fn reorg_from(&self, from: u64, fork: u8) {
        let head = *self.head.lock().unwrap();
        let mut forks = self.forks.lock().unwrap();
        for number in from..=head {
            forks.insert(number, fork);
        }
        self.logs.lock().unwrap().retain(|log| log.block_number < from);
    }

    pub fn set_on_chain_pool(&self, address: Address, pool: OnChainPool) {
        self.pools.lock().unwrap().insert(address, pool);
    }

    pub fn fail_get_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn hash_of(&self, number: u64) -> B256 {
        let fork = self.forks.lock().unwrap().get(&number).copied().unwrap_or(0);
        block_hash(number, fork)
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn block_number(&self) -> IndexerResult<u64> {
        Ok(*self.head.lock().unwrap())
    }

    async fn get_logs(&self, query: &LogQuery) -> IndexerResult<Vec<ChainLog>> {
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(IndexerError::rpc("eth_getLogs timed out", None));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.block_number >= query.from_block
                    && log.block_number <= query.to_block
                    && query.matches(log)
            })
            .cloned()
            .collect())
    }

    async fn get_block(&self, number: u64) -> IndexerResult<Option<BlockHeader>> {
        if number > *self.head.lock().unwrap() {
            return Ok(None);
        }
        Ok(Some(BlockHeader {
            number,
            hash: self.hash_of(number),
            parent_hash: self.hash_of(number.saturating_sub(1)),
            timestamp: GENESIS_TIME + 12 * number,
        }))
    }

    async fn get_transaction_receipt(&self, _hash: B256) -> IndexerResult<Option<ReceiptSummary>> {
        Ok(Some(ReceiptSummary {
            gas_used: 120_000,
            effective_gas_price: 20_000_000_000,
        }))
    }

    async fn read_pool(&self, pool: Address) -> IndexerResult<OnChainPool> {
        self.pools
            .lock()
            .unwrap()
            .get(&pool)
            .copied()
            .ok_or_else(|| IndexerError::rpc(format!("execution reverted for {pool}"), None))
    }

    async fn subscribe_logs(&self, _query: &LogQuery) -> IndexerResult<LogStream> {
        Err(IndexerError::rpc("subscriptions not supported", None))
    }

    fn supports_subscriptions(&self) -> bool {
        false
    }
}

/// Oracle with fixed quotes, or a scripted failure.
#[derive(Default)]
pub struct MockOracle {
    quotes: HashMap<String, Decimal>,
    rate_limited: bool,
}

impl MockOracle {
    pub fn with_quotes(quotes: &[(&str, Decimal)]) -> Arc<Self> {
        Arc::new(Self {
            quotes: quotes.iter().map(|(id, p)| ((*id).to_string(), *p)).collect(),
            rate_limited: false,
        })
    }

    pub fn rate_limited() -> Arc<Self> {
        Arc::new(Self {
            quotes: HashMap::new(),
            rate_limited: true,
        })
    }
}

#[async_trait]
impl PriceOracleGateway for MockOracle {
    async fn get_prices(&self, ids: &[String]) -> IndexerResult<HashMap<String, Decimal>> {
        if self.rate_limited {
            return Err(IndexerError::rate_limited("429 Too Many Requests"));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.quotes.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

pub async fn memory_storage() -> Arc<Repository> {
    Arc::new(Repository::new(
        create_pool("sqlite::memory:").await.expect("in-memory database"),
    ))
}

pub async fn seed_tokens(storage: &dyn StorageGateway) {
    let tokens = [
        TokenRecord::new(USDC, "USDC", "USD Coin", 6, Some("usd-coin".into())),
        TokenRecord::new(WETH, "WETH", "Wrapped Ether", 18, Some("weth".into())),
        TokenRecord::new(WBTC, "WBTC", "Wrapped BTC", 8, None),
        TokenRecord::new(DAI, "DAI", "Dai Stablecoin", 18, None),
    ];
    for token in &tokens {
        storage.upsert_token(token).await.expect("seed token");
    }
}

/// `sqrt` as a Q96 fixed-point value.
pub fn q96(sqrt: u64) -> U256 {
    U256::from(sqrt) << 96
}

fn to_chain_log(
    address: Address,
    data: &LogData,
    block_number: u64,
    tx: B256,
    log_index: u64,
) -> ChainLog {
    ChainLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number,
        block_hash: None,
        transaction_hash: tx,
        log_index,
        removed: false,
    }
}

pub fn pool_created_log(
    token0: Address,
    token1: Address,
    fee: u32,
    pool: Address,
    block_number: u64,
) -> ChainLog {
    let event = PoolCreated {
        token0,
        token1,
        fee: U24::from(fee),
        tickSpacing: I24::try_from(60_i32).unwrap(),
        pool,
    };
    to_chain_log(
        FACTORY,
        &event.encode_log_data(),
        block_number,
        B256::with_last_byte(0xfa),
        0,
    )
}

pub fn swap_log(
    pool: Address,
    block_number: u64,
    tx: B256,
    log_index: u64,
    amount0: i64,
    amount1: i64,
    sqrt_price_x96: U256,
) -> ChainLog {
    let event = Swap {
        sender: address!("E592427A0AEce92De3Edee1F18E0157C05861564"),
        recipient: address!("0000000000000000000000000000000000000b0b"),
        amount0: I256::try_from(amount0).unwrap(),
        amount1: I256::try_from(amount1).unwrap(),
        sqrtPriceX96: U160::from(sqrt_price_x96),
        liquidity: 1_000_000_000_000,
        tick: I24::try_from(-200_000_i32).unwrap(),
    };
    to_chain_log(pool, &event.encode_log_data(), block_number, tx, log_index)
}
