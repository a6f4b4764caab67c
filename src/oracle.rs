//! External USD price oracle.
//!
//! [`PriceOracleGateway`] answers batch id → USD price lookups. Missing ids are
//! simply absent from the result; HTTP 429 surfaces as
//! [`IndexerError::RateLimited`] so callers can back off for the rest of a
//! cycle. Large lookups are split into several requests; once one of them
//! has succeeded, a later failure only truncates the result. [`CoinGeckoOracle`] implements it against the `/simple/price`
//! endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{IndexerError, IndexerResult};

/// Ids per `/simple/price` request.
const MAX_IDS_PER_REQUEST: usize = 250;

/// Batch USD price lookup by oracle id.
#[async_trait]
pub trait PriceOracleGateway: Send + Sync {
    /// Prices for every id the oracle knows. Unknown ids are omitted.
    async fn get_prices(&self, ids: &[String]) -> IndexerResult<HashMap<String, Decimal>>;

    /// Price for a single id.
    async fn get_price(&self, id: &str) -> IndexerResult<Option<Decimal>> {
        let mut prices = self.get_prices(&[id.to_string()]).await?;
        Ok(prices.remove(id))
    }
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<Decimal>,
}

/// CoinGecko-compatible oracle client.
#[derive(Debug, Clone)]
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoOracle {
    /// Creates a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an oracle error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> IndexerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::oracle("Failed to build HTTP client", Some(Box::new(e))))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn fetch_chunk(&self, ids: &[String]) -> IndexerResult<HashMap<String, Decimal>> {
        let url = format!("{}/simple/price", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())]);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexerError::rate_limited("Price oracle returned 429"));
        }
        if !status.is_success() {
            return Err(IndexerError::oracle(
                format!("Price oracle returned HTTP {status}"),
                None,
            ));
        }

        let quotes: HashMap<String, UsdQuote> = response.json().await.map_err(|e| {
            IndexerError::oracle("Malformed price oracle response", Some(Box::new(e)))
        })?;

        Ok(quotes
            .into_iter()
            .filter_map(|(id, quote)| match quote.usd {
                Some(price) if price > Decimal::ZERO => Some((id, price)),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl PriceOracleGateway for CoinGeckoOracle {
    #[instrument(skip(self, ids), fields(requested = ids.len(), received = tracing::field::Empty))]
    async fn get_prices(&self, ids: &[String]) -> IndexerResult<HashMap<String, Decimal>> {
        let mut prices = HashMap::with_capacity(ids.len());
        for (index, chunk) in ids.chunks(MAX_IDS_PER_REQUEST).enumerate() {
            match self.fetch_chunk(chunk).await {
                Ok(chunk_prices) => prices.extend(chunk_prices),
                Err(e) if index > 0 => {
                    // Keep what earlier requests returned; the rest stay missing.
                    warn!(
                        chunk = index,
                        received = prices.len(),
                        error = %e,
                        "Oracle request failed, returning prices fetched so far"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if prices.len() < ids.len() {
            warn!(
                missing = ids.len() - prices.len(),
                "Oracle returned partial results"
            );
        }
        tracing::Span::current().record("received", prices.len());
        debug!(received = prices.len(), "Oracle prices fetched");
        Ok(prices)
    }
}
