//! WebSocket provider for push-based log subscriptions.
//!
//! Each tracked pool gets its own `eth_subscribe("logs")` stream. The
//! connection is shared; [`ReconnectingWebSocket`] re-establishes it with
//! exponential backoff when it drops.

use std::time::Duration;

use alloy::{
    providers::{Provider, ProviderBuilder, RootProvider},
    pubsub::Subscription,
    rpc::types::{Filter, Log},
    transports::BoxTransport,
};
use tracing::{debug, error, info, instrument, warn};

use super::http::redact_url;
use crate::error::{IndexerError, IndexerResult};

/// WebSocket provider wrapping an alloy pubsub connection.
#[derive(Debug, Clone)]
pub struct WebSocketProvider {
    provider: RootProvider<BoxTransport>,
    url: String,
}

impl WebSocketProvider {
    /// Connects to a WebSocket RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the handshake fails.
    #[instrument(skip(ws_url), fields(ws_host = tracing::field::Empty, duration_ms = tracing::field::Empty))]
    pub async fn connect(ws_url: String) -> IndexerResult<Self> {
        let host = redact_url(&ws_url).to_string();
        tracing::Span::current().record("ws_host", host.as_str());

        let start = std::time::Instant::now();
        let provider = ProviderBuilder::new()
            .on_builtin(&ws_url)
            .await
            .map_err(|e| {
                error!(error = %e, ws_host = %host, "WebSocket connection failed");
                IndexerError::websocket_connection(
                    format!("WebSocket connection to {host} failed"),
                    Some(Box::new(e)),
                )
            })?;

        let duration = start.elapsed();
        tracing::Span::current().record("duration_ms", duration.as_millis() as u64);
        info!(ws_host = %host, duration_ms = duration.as_millis(), "WebSocket connected");

        Ok(Self {
            provider,
            url: ws_url,
        })
    }

    /// Returns the WebSocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to logs matching `filter`.
    ///
    /// The subscription's stream ends when the connection drops.
    ///
    /// # Errors
    ///
    /// Returns a subscription error if the node rejects the request.
    #[instrument(skip(self, filter))]
    pub async fn subscribe_logs(
        &self,
        filter: &Filter,
    ) -> IndexerResult<Subscription<Log>> {
        let sub = self.provider.subscribe_logs(filter).await.map_err(|e| {
            IndexerError::websocket_subscription("Log subscription failed", Some(Box::new(e)))
        })?;

        debug!("Log subscription active");
        Ok(sub)
    }
}

/// Reconnecting WebSocket connection with exponential backoff and jitter.
#[derive(Debug)]
pub struct ReconnectingWebSocket {
    url: String,
    provider: Option<WebSocketProvider>,
    max_reconnect_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectingWebSocket {
    /// Default settings: 10 attempts, 1s initial delay, 60s cap.
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self::with_settings(url, 10, Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Custom retry settings.
    #[must_use]
    pub const fn with_settings(
        url: String,
        max_reconnect_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            url,
            provider: None,
            max_reconnect_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Returns the connected provider, connecting first if needed.
    ///
    /// Delays double after each failure up to the cap, with ±12.5% jitter.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::MaxReconnectAttemptsExceeded`] once the attempt
    /// budget is spent.
    pub async fn connect(&mut self) -> IndexerResult<WebSocketProvider> {
        if let Some(provider) = &self.provider {
            return Ok(provider.clone());
        }

        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            match WebSocketProvider::connect(self.url.clone()).await {
                Ok(provider) => {
                    self.provider = Some(provider.clone());
                    return Ok(provider);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_reconnect_attempts {
                        error!(attempts = attempt, "Max reconnection attempts reached");
                        return Err(IndexerError::max_reconnect_exceeded(attempt, e.to_string()));
                    }

                    warn!(
                        attempt,
                        max_attempts = self.max_reconnect_attempts,
                        error = %e,
                        retry_in = ?delay,
                        "WebSocket connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.max_delay);
                }
            }
        }
    }

    /// Drop the current connection and connect again.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn reconnect(&mut self) -> IndexerResult<WebSocketProvider> {
        warn!("Reconnecting WebSocket after disconnection");
        self.provider = None;
        self.connect().await
    }

    /// Checks if currently connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.provider.is_some()
    }

    /// Returns the WebSocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub(crate) fn next_delay(current: Duration, max: Duration) -> Duration {
    let doubled = std::cmp::min(current * 2, max);
    let jitter_factor = 0.25 * (rand::random::<f64>() - 0.5);
    let scaled = (doubled.as_millis() as f64 * (1.0 + jitter_factor)).round().max(0.0);
    Duration::from_millis(scaled as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnecting_websocket_creation() {
        let reconnecting = ReconnectingWebSocket::new("wss://test.com".to_string());
        assert_eq!(reconnecting.url(), "wss://test.com");
        assert!(!reconnecting.is_connected());
    }

    #[test]
    fn test_backoff_stays_within_jitter_of_cap() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        for _ in 0..20 {
            delay = next_delay(delay, max);
            assert!(delay <= max + max / 8, "delay {delay:?} exceeded cap");
        }
        assert!(delay >= max - max / 8);
    }

    #[tokio::test]
    async fn test_reconnection_gives_up_after_budget() {
        let mut reconnecting = ReconnectingWebSocket::with_settings(
            "ws://127.0.0.1:1".to_string(),
            2,
            Duration::from_millis(10),
            Duration::from_millis(20),
        );

        let result = reconnecting.connect().await;
        assert!(matches!(
            result,
            Err(IndexerError::MaxReconnectAttemptsExceeded { attempts: 2, .. })
        ));
    }
}
