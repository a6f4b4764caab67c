//! # DEX Pool Indexer
//!
//! Indexes Uniswap V3 style pools on a single EVM chain and resolves USD prices
//! for the tokens they hold, using [Alloy](https://github.com/alloy-rs/alloy)
//! for chain access and SQLite for storage.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐  PoolCreated   ┌──────────────────────┐
//!  chain ───►│ BlockScanner │───────────────►│ PoolLifecycleManager │
//!   RPC      │  + Reorg     │                └──────────┬───────────┘
//!            │  Detector    │ Swap/Mint/Burn            │ subscriptions
//!            └──────┬───────┘                           ▼
//!                   ▼                            mpsc<ChainLog>
//!            ┌──────────────┐
//!            │ EventProcessor│──► SQLite ◄── PriceResolutionEngine ◄── oracle
//!            └──────────────┘
//! ```
//!
//! - [`indexer`]: block scanning, event persistence, pool lifecycle
//! - [`reorg`]: divergence detection and rollback
//! - [`pricing`]: Q96 math and the multi-pass price resolution engine
//! - [`rpc`], [`db`], [`oracle`]: the chain, storage and price oracle gateways
//! - [`api`], [`cli`], [`service`]: operator surfaces and process wiring
//!
//! ## Error Handling
//!
//! All operations return [`error::IndexerResult<T>`](error::IndexerResult):
//!
//! ```rust
//! use dex_pool_indexer::error::{IndexerError, IndexerResult};
//!
//! fn example() -> IndexerResult<()> {
//!     Err(IndexerError::validation("bad input"))
//! }
//!
//! assert!(example().is_err());
//! ```
//!
//! ## Configuration
//!
//! Read from the environment (and `.env`) by [`config::Config::from_env`].
//! Only `RPC_URL` is required.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod app_state;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod indexer;
pub mod observability;
pub mod oracle;
pub mod pricing;
pub mod reorg;
pub mod rpc;
pub mod service;
