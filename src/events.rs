//! Decoding of Uniswap V3 factory and pool events.
//!
//! Bindings come from Alloy's `sol!` macro, so topic layout and ABI decoding
//! are generated from the Solidity signatures. [`decode_log`] turns a
//! [`ChainLog`] into a [`DecodedEvent`] with native integer types.

use alloy::primitives::{Address, I256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::error::{IndexerError, IndexerResult};
use crate::rpc::gateway::ChainLog;

sol! {
    /// Pool factory.
    #[sol(rpc)]
    interface IUniswapV3Factory {
        event PoolCreated(
            address indexed token0,
            address indexed token1,
            uint24 indexed fee,
            int24 tickSpacing,
            address pool
        );
    }
}

sol! {
    /// Concentrated-liquidity pool.
    #[sol(rpc)]
    interface IUniswapV3Pool {
        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );

        event Mint(
            address sender,
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );

        event Burn(
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );

        function token0() external view returns (address);
        function token1() external view returns (address);
        function fee() external view returns (uint24);
        function liquidity() external view returns (uint128);
    }
}

pub use IUniswapV3Factory::PoolCreated;
pub use IUniswapV3Pool::{Burn, Mint, Swap};

/// Topic-0 values of every pool event the indexer stores.
pub const POOL_EVENT_SIGNATURES: [alloy::primitives::B256; 3] =
    [Swap::SIGNATURE_HASH, Mint::SIGNATURE_HASH, Burn::SIGNATURE_HASH];

/// A factory `PoolCreated` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCreatedEvent {
    /// Lower-sorted token
    pub token0: Address,
    /// Higher-sorted token
    pub token1: Address,
    /// Fee tier
    pub fee: u32,
    /// Tick spacing of the fee tier
    pub tick_spacing: i32,
    /// New pool contract
    pub pool: Address,
}

/// A pool `Swap` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapEvent {
    /// Caller of `swap`
    pub sender: Address,
    /// Output receiver
    pub recipient: Address,
    /// Pool balance delta of token0
    pub amount0: I256,
    /// Pool balance delta of token1
    pub amount1: I256,
    /// Price after the swap
    pub sqrt_price_x96: U256,
    /// In-range liquidity after the swap
    pub liquidity: u128,
    /// Tick after the swap
    pub tick: i32,
}

/// A pool `Mint` or `Burn` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityChange {
    /// Position owner
    pub owner: Address,
    /// Lower tick of the position
    pub tick_lower: i32,
    /// Upper tick of the position
    pub tick_upper: i32,
    /// Liquidity added or removed
    pub amount: u128,
    /// Token0 amount
    pub amount0: U256,
    /// Token1 amount
    pub amount1: U256,
}

/// Typed form of every event the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Factory created a pool
    PoolCreated(PoolCreatedEvent),
    /// Swap in a pool
    Swap(SwapEvent),
    /// Liquidity added
    Mint(LiquidityChange),
    /// Liquidity removed
    Burn(LiquidityChange),
}

fn tick(value: alloy::primitives::aliases::I24, field: &str) -> IndexerResult<i32> {
    i32::try_from(value).map_err(|e| {
        IndexerError::decoding(format!("{field} does not fit in i32"), Some(Box::new(e)))
    })
}

fn decode_error(name: &str, log: &ChainLog, e: alloy::sol_types::Error) -> IndexerError {
    IndexerError::decoding(
        format!(
            "Malformed {name} log {}:{}",
            log.transaction_hash, log.log_index
        ),
        Some(Box::new(e)),
    )
}

/// Decode a log by its topic-0 signature.
///
/// # Errors
///
/// Returns a decoding error for unknown signatures or malformed payloads.
pub fn decode_log(log: &ChainLog) -> IndexerResult<DecodedEvent> {
    let Some(signature) = log.signature() else {
        return Err(IndexerError::decoding("Log has no topics", None));
    };
    let data = log.log_data();

    match signature {
        Swap::SIGNATURE_HASH => {
            let ev = Swap::decode_log_data(&data, true).map_err(|e| decode_error("Swap", log, e))?;
            Ok(DecodedEvent::Swap(SwapEvent {
                sender: ev.sender,
                recipient: ev.recipient,
                amount0: ev.amount0,
                amount1: ev.amount1,
                sqrt_price_x96: U256::from(ev.sqrtPriceX96),
                liquidity: ev.liquidity,
                tick: tick(ev.tick, "tick")?,
            }))
        }
        Mint::SIGNATURE_HASH => {
            let ev = Mint::decode_log_data(&data, true).map_err(|e| decode_error("Mint", log, e))?;
            Ok(DecodedEvent::Mint(LiquidityChange {
                owner: ev.owner,
                tick_lower: tick(ev.tickLower, "tickLower")?,
                tick_upper: tick(ev.tickUpper, "tickUpper")?,
                amount: ev.amount,
                amount0: ev.amount0,
                amount1: ev.amount1,
            }))
        }
        Burn::SIGNATURE_HASH => {
            let ev = Burn::decode_log_data(&data, true).map_err(|e| decode_error("Burn", log, e))?;
            Ok(DecodedEvent::Burn(LiquidityChange {
                owner: ev.owner,
                tick_lower: tick(ev.tickLower, "tickLower")?,
                tick_upper: tick(ev.tickUpper, "tickUpper")?,
                amount: ev.amount,
                amount0: ev.amount0,
                amount1: ev.amount1,
            }))
        }
        PoolCreated::SIGNATURE_HASH => {
            let ev = PoolCreated::decode_log_data(&data, true)
                .map_err(|e| decode_error("PoolCreated", log, e))?;
            Ok(DecodedEvent::PoolCreated(PoolCreatedEvent {
                token0: ev.token0,
                token1: ev.token1,
                fee: ev.fee.to::<u32>(),
                tick_spacing: tick(ev.tickSpacing, "tickSpacing")?,
                pool: ev.pool,
            }))
        }
        other => Err(IndexerError::decoding(
            format!("Unknown event signature {other}"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, aliases::{I24, U24}, Bytes, B256, U160};

    fn chain_log(address: Address, data: &alloy::primitives::LogData) -> ChainLog {
        ChainLog {
            address,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number: 1,
            block_hash: None,
            transaction_hash: B256::ZERO,
            log_index: 0,
            removed: false,
        }
    }

    #[test]
    fn test_decode_swap_with_negative_tick() {
        let swap = Swap {
            sender: address!("1111111111111111111111111111111111111111"),
            recipient: address!("2222222222222222222222222222222222222222"),
            amount0: I256::try_from(-5_000_i64).expect("i256"),
            amount1: I256::try_from(7_000_i64).expect("i256"),
            sqrtPriceX96: U160::from(1_u128 << 96),
            liquidity: 42,
            tick: I24::try_from(-887_272_i32).expect("i24"),
        };
        let log = chain_log(Address::ZERO, &swap.encode_log_data());

        let DecodedEvent::Swap(decoded) = decode_log(&log).expect("decode") else {
            panic!("expected swap");
        };
        assert_eq!(decoded.tick, -887_272);
        assert_eq!(decoded.amount0.to_string(), "-5000");
        assert_eq!(decoded.sqrt_price_x96, U256::from(1_u128 << 96));
        assert_eq!(decoded.liquidity, 42);
    }

    #[test]
    fn test_decode_pool_created() {
        let created = PoolCreated {
            token0: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            token1: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            fee: U24::from(500_u32),
            tickSpacing: I24::try_from(10_i32).expect("i24"),
            pool: address!("88e6a0c2ddd26feeb64f039a2c41296fcb3f5640"),
        };
        let log = chain_log(Address::ZERO, &created.encode_log_data());

        assert_eq!(
            decode_log(&log).expect("decode"),
            DecodedEvent::PoolCreated(PoolCreatedEvent {
                token0: created.token0,
                token1: created.token1,
                fee: 500,
                tick_spacing: 10,
                pool: created.pool,
            })
        );
    }

    #[test]
    fn test_decode_burn() {
        let burn = Burn {
            owner: address!("3333333333333333333333333333333333333333"),
            tickLower: I24::try_from(-600_i32).expect("i24"),
            tickUpper: I24::try_from(600_i32).expect("i24"),
            amount: 1_000,
            amount0: U256::from(10),
            amount1: U256::from(20),
        };
        let log = chain_log(Address::ZERO, &burn.encode_log_data());

        let DecodedEvent::Burn(decoded) = decode_log(&log).expect("decode") else {
            panic!("expected burn");
        };
        assert_eq!((decoded.tick_lower, decoded.tick_upper), (-600, 600));
        assert_eq!(decoded.amount, 1_000);
    }

    #[test]
    fn test_unknown_and_malformed_logs_fail() {
        let mut log = chain_log(
            Address::ZERO,
            &alloy::primitives::LogData::new_unchecked(vec![B256::ZERO], Bytes::new()),
        );
        assert!(matches!(
            decode_log(&log),
            Err(IndexerError::DecodingError { .. })
        ));

        log.topics = vec![Swap::SIGNATURE_HASH];
        assert!(decode_log(&log).is_err());

        log.topics.clear();
        assert!(decode_log(&log).is_err());
    }

    #[test]
    fn test_signatures_are_distinct() {
        assert_ne!(Mint::SIGNATURE_HASH, Burn::SIGNATURE_HASH);
        assert!(!POOL_EVENT_SIGNATURES.contains(&PoolCreated::SIGNATURE_HASH));
    }
}
