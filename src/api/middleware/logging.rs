//! Request logging middleware using tracing.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Logs each control request with its outcome. Failed management calls are
/// logged at warn level.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    if response.status().is_client_error() || response.status().is_server_error() {
        warn!(method = %method, path, status, duration_ms, "Request failed");
    } else {
        info!(method = %method, path, status, duration_ms, "Request completed");
    }

    response
}
