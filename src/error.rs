//! Error types for the pool indexer.
//!
//! [`IndexerError`] covers every failure the indexing pipeline, the price
//! resolution engine and their gateways can produce.
//!
//! # Design
//!
//! The variants are organized by layer:
//! - [`IndexerError::ConfigError`]: Configuration and environment issues
//! - [`IndexerError::RpcError`]: RPC provider and network errors (transient)
//! - [`IndexerError::DecodingError`]: Log decoding errors (skip the event)
//! - [`IndexerError::DatabaseError`]: Persistence errors (abort the batch)
//! - [`IndexerError::RateLimited`]: Oracle back-off signal, distinct from "no data"
//! - [`IndexerError::ReorgTooDeep`]: The only reorg outcome that is not recoverable
//!
//! # Example
//!
//! ```
//! use dex_pool_indexer::error::{IndexerError, IndexerResult};
//!
//! fn validate_batch_size(size: u64) -> IndexerResult<()> {
//!     if size == 0 {
//!         return Err(IndexerError::config("BATCH_SIZE must be positive", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`IndexerError`].
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Boxed error source carried by most variants.
pub type ErrorSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the indexer.
#[derive(Debug)]
pub enum IndexerError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// RPC provider or network errors, including timeouts.
    ///
    /// Always treated as transient: the current batch or cycle aborts and the
    /// next scheduled trigger retries.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Event decoding or parsing errors.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Indexer state consistency errors.
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Arithmetic or conversion errors.
    MathError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Database operation errors.
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Caller supplied invalid input (bad address, bad block number).
    ValidationError {
        /// Human-readable error message
        message: String,
    },

    /// A referenced entity does not exist.
    NotFound {
        /// Human-readable error message
        message: String,
    },

    /// Price oracle request failed (network, decoding, unexpected status).
    OracleError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Price oracle answered with HTTP 429.
    RateLimited {
        /// Human-readable error message
        message: String,
    },

    /// Stored block hashes disagree with the chain over the whole check window.
    ReorgTooDeep {
        /// Lowest block number that was compared
        checked_from: u64,
        /// Cursor position when the check ran
        last_block: u64,
    },

    /// A scan or reindex already holds the scanner guard.
    ScanInProgress,

    /// WebSocket connection errors.
    WebSocketConnectionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// WebSocket subscription errors.
    WebSocketSubscriptionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<ErrorSource>,
    },

    /// Max reconnection attempts exceeded.
    MaxReconnectAttemptsExceeded {
        /// Number of attempts made
        attempts: u32,
        /// Last error encountered
        last_error: String,
    },
}

impl IndexerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::config("RPC_URL not set", None);
    /// assert!(matches!(err, IndexerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new math error.
    #[must_use]
    pub fn math(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::MathError {
            message: message.into(),
            source,
        }
    }

    /// Create a new database error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_pool_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::database("Connection failed", None);
    /// assert!(matches!(err, IndexerError::DatabaseError { .. }));
    /// ```
    #[must_use]
    pub fn database(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create a validation error for bad caller input.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an oracle error.
    #[must_use]
    pub fn oracle(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::OracleError {
            message: message.into(),
            source,
        }
    }

    /// Create an oracle rate-limit signal.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Create a new WebSocket connection error.
    #[must_use]
    pub fn websocket_connection(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        Self::WebSocketConnectionError {
            message: message.into(),
            source,
        }
    }

    /// Create a new WebSocket subscription error.
    #[must_use]
    pub fn websocket_subscription(
        message: impl Into<String>,
        source: Option<ErrorSource>,
    ) -> Self {
        Self::WebSocketSubscriptionError {
            message: message.into(),
            source,
        }
    }

    /// Create a max reconnect attempts exceeded error.
    #[must_use]
    pub fn max_reconnect_exceeded(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::MaxReconnectAttemptsExceeded {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Whether the error is expected to clear on its own (retry next tick).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RpcError { .. }
                | Self::RateLimited { .. }
                | Self::OracleError { .. }
                | Self::ScanInProgress
                | Self::WebSocketConnectionError { .. }
                | Self::WebSocketSubscriptionError { .. }
        )
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
            Self::MathError { message, .. } => write!(f, "Math error: {message}"),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
            Self::ValidationError { message } => write!(f, "Validation error: {message}"),
            Self::NotFound { message } => write!(f, "Not found: {message}"),
            Self::OracleError { message, .. } => write!(f, "Oracle error: {message}"),
            Self::RateLimited { message } => write!(f, "Oracle rate limited: {message}"),
            Self::ReorgTooDeep {
                checked_from,
                last_block,
            } => write!(
                f,
                "Reorg too deep: no stored block hash between {checked_from} and {last_block} is canonical"
            ),
            Self::ScanInProgress => write!(f, "A scan is already in progress"),
            Self::WebSocketConnectionError { message, .. } => {
                write!(f, "WebSocket connection error: {message}")
            }
            Self::WebSocketSubscriptionError { message, .. } => {
                write!(f, "WebSocket subscription error: {message}")
            }
            Self::MaxReconnectAttemptsExceeded {
                attempts,
                last_error,
            } => write!(
                f,
                "Max reconnection attempts ({attempts}) exceeded. Last error: {last_error}"
            ),
        }
    }
}

impl std::error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::StateError { source, .. }
            | Self::MathError { source, .. }
            | Self::DatabaseError { source, .. }
            | Self::OracleError { source, .. }
            | Self::WebSocketConnectionError { source, .. }
            | Self::WebSocketSubscriptionError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::ValidationError { .. }
            | Self::NotFound { .. }
            | Self::RateLimited { .. }
            | Self::ReorgTooDeep { .. }
            | Self::ScanInProgress
            | Self::MaxReconnectAttemptsExceeded { .. } => None,
        }
    }
}

/// Eyre reports only surface from the websocket layer, so they map to RPC errors.
impl From<eyre::Report> for IndexerError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        Self::OracleError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
