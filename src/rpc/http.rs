//! HTTP provider construction.
//!
//! Historical queries (`eth_getLogs`, blocks, receipts, pool reads) all go
//! through a plain alloy HTTP provider; subscriptions use [`super::websocket`].

use crate::error::{IndexerError, IndexerResult};
use alloy::providers::{Provider as _, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use tracing::{debug, info, instrument, warn};

/// HTTP provider type used for every request/response call.
pub type Provider = RootProvider<Http<Client>>;

/// Host part of an RPC URL, safe to log (drops path segments carrying API keys).
#[must_use]
pub fn redact_url(url: &str) -> &str {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("unknown")
}

/// Create an RPC provider connected via HTTP.
///
/// No request is made here; use [`check_connection`] to verify reachability.
///
/// # Errors
///
/// Returns an RPC error if the URL cannot be parsed.
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub fn create_provider(rpc_url: &str) -> IndexerResult<Provider> {
    let host = redact_url(rpc_url);
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        let msg = if rpc_url.starts_with("http") {
            format!("Failed to parse RPC URL for host '{host}'")
        } else {
            "Invalid RPC_URL: expected an http(s) endpoint such as 'https://mainnet.example/v2/KEY'"
                .to_string()
        };
        IndexerError::rpc(msg, Some(Box::new(e)))
    })?;

    let provider = ProviderBuilder::new().on_http(url);
    info!(rpc_host = host, "RPC provider initialized");

    Ok(provider)
}

/// Latest block number at the head of the chain.
///
/// # Errors
///
/// Returns an RPC error if the request fails.
#[instrument(skip(provider), fields(block = tracing::field::Empty, duration_ms = tracing::field::Empty))]
pub async fn get_latest_block(provider: &Provider) -> IndexerResult<u64> {
    let start = std::time::Instant::now();
    let block_number = provider
        .get_block_number()
        .await
        .map_err(|e| IndexerError::rpc("Failed to fetch latest block number", Some(Box::new(e))))?;

    let duration = start.elapsed();
    tracing::Span::current().record("block", block_number);
    tracing::Span::current().record("duration_ms", duration.as_millis() as u64);
    debug!(block = block_number, "Latest block fetched");

    Ok(block_number)
}

/// Verify connectivity by fetching the latest block.
///
/// # Errors
///
/// Returns an RPC error if the node is unreachable.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> IndexerResult<u64> {
    match get_latest_block(provider).await {
        Ok(block) => {
            info!(block, "Connection check successful");
            Ok(block)
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(IndexerError::rpc(
                format!("Provider connection health check failed: {e}"),
                None,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url_strips_path() {
        assert_eq!(
            redact_url("https://eth-mainnet.g.alchemy.com/v2/SECRET"),
            "eth-mainnet.g.alchemy.com"
        );
        assert_eq!(redact_url("ws://localhost:8546"), "localhost:8546");
        assert_eq!(redact_url("garbage"), "unknown");
    }

    #[test]
    fn test_create_provider_invalid_url() {
        assert!(create_provider("not-a-valid-url").is_err());
    }

    #[test]
    fn test_create_provider_valid_url() {
        assert!(create_provider("http://localhost:8545").is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires a reachable RPC_URL"]
    async fn test_get_latest_block_integration() {
        let rpc_url =
            std::env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());
        let provider = create_provider(&rpc_url).expect("provider");
        let block = get_latest_block(&provider).await.expect("block number");
        assert!(block > 0);
    }
}
