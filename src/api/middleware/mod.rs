//! Middleware for the control API.

pub mod error;
pub mod logging;
pub mod rate_limit;

pub use error::ApiError;
