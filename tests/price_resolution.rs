//! Integration tests for the price resolution cycle: oracle seeding,
//! multi-pass relaxation, path search and the statistics it persists.
//!
//! Pool prices are chosen so that every conversion is exact:
//!
//! | pool        | sqrtPriceX96    | meaning               |
//! |-------------|-----------------|-----------------------|
//! | USDC/WETH   | 20000 · 2^96    | 1 WETH = 2500 USDC    |
//! | WBTC/USDC   | 20 · 2^96       | 1 WBTC = 40000 USDC   |
//! | WBTC/DAI    | 2·10^7 · 2^96   | 1 WBTC = 40000 DAI    |

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::unreadable_literal)]

mod common;

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{address, Address, B256};
use rust_decimal::Decimal;

use dex_pool_indexer::db::models::{address_key, hash_key, NewPool, SwapRecord, TokenRecord};
use dex_pool_indexer::db::{Repository, StorageGateway};
use dex_pool_indexer::oracle::PriceOracleGateway;
use dex_pool_indexer::pricing::{PriceResolutionEngine, PriceSource};

use common::*;

const NOW: i64 = 1_750_000_000;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

const WBTC_DAI_POOL: Address = address!("391E8501b626C623d39474AfcA6f9e46c2686649");

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn add_pool(storage: &dyn StorageGateway, pool: Address, token0: Address, token1: Address, fee: u32, sqrt: u64) {
    storage
        .insert_pool(&NewPool {
            address: pool,
            token0,
            token1,
            fee,
            tick_spacing: Some(10),
            sqrt_price_x96: Some(q96(sqrt)),
            liquidity: 1_000_000_000_000_000_000,
            tick: Some(0),
            created_block: Some(1),
        })
        .await
        .expect("insert pool");
}

async fn priced_world() -> Arc<Repository> {
    let storage = memory_storage().await;
    seed_tokens(storage.as_ref()).await;
    add_pool(storage.as_ref(), USDC_WETH_POOL, USDC, WETH, 500, 20_000).await;
    add_pool(storage.as_ref(), WBTC_USDC_POOL, WBTC, USDC, 3000, 20).await;
    add_pool(storage.as_ref(), WBTC_DAI_POOL, WBTC, DAI, 3000, 20_000_000).await;
    storage
}

fn engine(storage: &Arc<Repository>, oracle: Arc<dyn PriceOracleGateway>) -> PriceResolutionEngine {
    PriceResolutionEngine::new(storage.clone(), oracle)
}

fn key(token: Address) -> String {
    address_key(&token)
}

#[tokio::test]
async fn test_pool_only_tokens_resolve_in_passes() {
    let storage = priced_world().await;
    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("2500"))]);

    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert_eq!(report.tokens, 4);
    assert!(report.unpriced.is_empty());
    assert!(!report.oracle_backoff);

    assert_eq!(report.prices[&key(WBTC)], dec("40000"));
    assert_eq!(report.sources[&key(WBTC)], PriceSource::Pool { pass: 1 });

    // DAI only touches WBTC, which was unpriced in the pass-1 snapshot.
    assert_eq!(report.prices[&key(DAI)], dec("1"));
    assert_eq!(report.sources[&key(DAI)], PriceSource::Pool { pass: 2 });
    assert_eq!(report.passes, 2);

    assert_eq!(report.count_by(|s| *s == PriceSource::Oracle), 2);
}

#[tokio::test]
async fn test_oracle_price_takes_precedence_over_pool() {
    let storage = priced_world().await;
    // The pool says 2500; the oracle wins.
    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("3000"))]);

    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert_eq!(report.prices[&key(WETH)], dec("3000"));
    assert_eq!(report.sources[&key(WETH)], PriceSource::Oracle);
}

#[tokio::test]
async fn test_oracle_token_without_quote_is_pool_derived() {
    let storage = priced_world().await;
    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1"))]);

    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert_eq!(report.prices[&key(WETH)], dec("2500"));
    assert_eq!(report.sources[&key(WETH)], PriceSource::Pool { pass: 1 });
}

#[tokio::test]
async fn test_unanchored_graph_terminates_unpriced() {
    let storage = priced_world().await;
    let oracle = MockOracle::with_quotes(&[]);

    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert!(report.prices.is_empty());
    assert_eq!(report.unpriced.len(), 4);
    assert_eq!(report.passes, 1);
    assert_eq!(report.token_statistics, 0);
    assert_eq!(report.pool_statistics, 0);
}

#[tokio::test]
async fn test_rate_limited_oracle_backs_off_without_failing() {
    let storage = priced_world().await;

    let report = engine(&storage, MockOracle::rate_limited())
        .run_cycle_at(NOW)
        .await
        .expect("rate limit must not fail the cycle");
    assert!(report.oracle_backoff);
    assert_eq!(report.count_by(|s| *s == PriceSource::Oracle), 0);
    assert_eq!(report.unpriced.len(), 4);

    // Next cycle starts with a fresh state and seeds normally.
    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1"))]);
    let report = engine(&storage, oracle).run_cycle_at(NOW + 60).await.expect("cycle");
    assert!(!report.oracle_backoff);
    assert!(report.unpriced.is_empty());
}

#[tokio::test]
async fn test_pool_without_price_cannot_price() {
    let storage = memory_storage().await;
    seed_tokens(storage.as_ref()).await;
    storage
        .insert_pool(&NewPool {
            address: WBTC_USDC_POOL,
            token0: WBTC,
            token1: USDC,
            fee: 3000,
            tick_spacing: None,
            sqrt_price_x96: None,
            liquidity: 5,
            tick: Some(0),
            created_block: None,
        })
        .await
        .unwrap();

    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1"))]);
    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert_eq!(report.unpriced, vec![key(WBTC)]);
}

#[tokio::test]
async fn test_long_chain_falls_through_to_path_search() {
    let storage = memory_storage().await;
    seed_tokens(storage.as_ref()).await;

    // USDC <- A1 <- A2 <- ... <- A6, every hop at parity. Each pass can only
    // price one more link, so A6 is left for the path search.
    let links: Vec<Address> = (1..=6_u8)
        .map(|i| Address::with_last_byte(i))
        .collect();
    for (i, token) in links.iter().enumerate() {
        let record = TokenRecord::new(*token, format!("A{}", i + 1), "Link", 6, None);
        storage.upsert_token(&record).await.unwrap();
    }
    let mut previous = USDC;
    for (i, token) in links.iter().enumerate() {
        let (token0, token1) = if *token < previous { (*token, previous) } else { (previous, *token) };
        let pool = Address::with_last_byte(0x80 + u8::try_from(i).unwrap());
        add_pool(storage.as_ref(), pool, token0, token1, 100, 1).await;
        previous = *token;
    }

    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1"))]);
    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    assert_eq!(report.passes, 5);
    assert_eq!(report.sources[&key(links[4])], PriceSource::Pool { pass: 5 });
    assert_eq!(report.sources[&key(links[5])], PriceSource::Path { hops: 1 });
    assert_eq!(report.prices[&key(links[5])], dec("1"));
}

fn swap(pool: Address, n: u8, amount0: &str, amount1: &str, timestamp: i64) -> SwapRecord {
    SwapRecord {
        transaction_hash: hash_key(&B256::with_last_byte(n)),
        log_index: 0,
        pool_address: address_key(&pool),
        block_number: i64::from(n),
        sender: address_key(&Address::ZERO),
        recipient: address_key(&Address::ZERO),
        amount0: amount0.to_string(),
        amount1: amount1.to_string(),
        sqrt_price_x96: q96(20_000).to_string(),
        liquidity: "1000000000000000000".to_string(),
        tick: 0,
        gas_used: None,
        gas_price: None,
        timestamp,
        created_at: timestamp,
    }
}

#[tokio::test]
async fn test_statistics_volume_and_price_change() {
    let storage = priced_world().await;
    storage
        .upsert_swaps(&[
            swap(USDC_WETH_POOL, 1, "2500000000", "-1000000000000000000", NOW - 100),
            swap(USDC_WETH_POOL, 2, "-5000000000", "2000000000000000000", NOW - 200),
            // Outside the 24h window.
            swap(USDC_WETH_POOL, 3, "900000000000", "-9000000000000000000", NOW - 2 * DAY),
        ])
        .await
        .unwrap();

    let earlier = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("2000"))]);
    engine(&storage, earlier).run_cycle_at(NOW - HOUR).await.expect("earlier cycle");

    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("2500"))]);
    let report = engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");
    assert_eq!(report.token_statistics, 4);
    assert_eq!(report.pool_statistics, 3);

    let weth = storage
        .latest_token_statistic(&key(WETH))
        .await
        .unwrap()
        .expect("weth statistic");
    assert_eq!(weth.created_at, NOW);
    assert_eq!(weth.price_usd, "2500");
    assert_eq!(weth.price_change_1h.as_deref(), Some("25"));
    assert_eq!(weth.price_change_24h, None);
    assert_eq!(weth.volume_24h, "3");
    assert_eq!(weth.volume_24h_usd, "7500");

    let usdc = storage.latest_token_statistic(&key(USDC)).await.unwrap().expect("usdc");
    assert_eq!(usdc.volume_24h, "7500");
    assert_eq!(usdc.price_change_1h.as_deref(), Some("0"));

    let (tvl, volume, fees): (String, String, String) = sqlx::query_as(
        "SELECT tvl_usd, volume_24h_usd, fees_24h_usd FROM pool_statistics
         WHERE pool_address = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(key(USDC_WETH_POOL))
    .fetch_one(storage.pool())
    .await
    .unwrap();
    assert_eq!(volume, "7500");
    assert_eq!(fees, "3.75");
    assert!(dec(&tvl) > Decimal::ZERO);
}

#[tokio::test]
async fn test_price_change_uses_storage_beyond_history_window() {
    let storage = priced_world().await;

    let old = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("2000"))]);
    engine(&storage, old).run_cycle_at(NOW - 2 * DAY).await.expect("old cycle");

    let oracle = MockOracle::with_quotes(&[("usd-coin", dec("1")), ("weth", dec("3000"))]);
    engine(&storage, oracle).run_cycle_at(NOW).await.expect("cycle");

    let weth = storage.latest_token_statistic(&key(WETH)).await.unwrap().unwrap();
    assert_eq!(weth.price_change_24h.as_deref(), Some("50"));
    assert_eq!(weth.price_change_1h.as_deref(), Some("50"));
}
