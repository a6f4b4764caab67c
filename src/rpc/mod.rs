//! Node access for the indexer.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │          ChainGateway (trait)        │
//! │   block_number / get_logs / ...      │
//! └──────────────────────────────────────┘
//!                   │
//!          AlloyChainGateway
//!           │              │
//!     ┌─────▼─────┐   ┌────▼──────────────┐
//!     │   HTTP    │   │ ReconnectingWS    │
//!     │ Provider  │   │ (subscriptions)   │
//!     └───────────┘   └───────────────────┘
//!      batch scans      real-time logs
//! ```
//!
//! The pipeline depends only on [`gateway::ChainGateway`], so tests swap in
//! an in-memory chain.

pub mod gateway;
pub mod http;
pub mod websocket;

pub use gateway::{
    AlloyChainGateway, BlockHeader, ChainGateway, ChainLog, LogQuery, LogStream, OnChainPool,
    ReceiptSummary,
};
pub use http::{check_connection, create_provider, get_latest_block, redact_url, Provider};
pub use websocket::{ReconnectingWebSocket, WebSocketProvider};
