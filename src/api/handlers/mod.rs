//! HTTP handlers for API endpoints.

pub mod health;
pub mod indexer;
pub mod pools;
pub mod tokens;
