//! Scanner control endpoints.

use axum::{extract::State, Json};
use tracing::{error, info, instrument};

use crate::api::middleware::error::ApiError;
use crate::api::models::{ErrorResponse, MessageResponse, ReindexRequest, StatusResponse};
use crate::app_state::AppState;
use crate::error::IndexerError;

#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Scanner status", body = StatusResponse)
    ),
    tag = "Indexer"
)]
/// Returns cursor position, chain head and health.
#[instrument(skip(state))]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.scanner.get_status().await.into())
}

#[utoipa::path(
    post,
    path = "/api/v1/pause",
    responses(
        (status = 200, description = "Scanner paused", body = MessageResponse)
    ),
    tag = "Indexer"
)]
/// Stops the scanner from processing ticks.
pub async fn pause(State(state): State<AppState>) -> Json<MessageResponse> {
    state.scanner.pause();
    Json(MessageResponse::new("Scanner paused"))
}

#[utoipa::path(
    post,
    path = "/api/v1/resume",
    responses(
        (status = 200, description = "Scanner resumed", body = MessageResponse)
    ),
    tag = "Indexer"
)]
/// Resumes scanning.
pub async fn resume(State(state): State<AppState>) -> Json<MessageResponse> {
    state.scanner.resume();
    Json(MessageResponse::new("Scanner resumed"))
}

#[utoipa::path(
    post,
    path = "/api/v1/reindex",
    request_body = ReindexRequest,
    responses(
        (status = 202, description = "Reindex started", body = MessageResponse),
        (status = 409, description = "A scan is running", body = ErrorResponse)
    ),
    tag = "Indexer"
)]
/// Starts a reindex in the background and returns immediately.
///
/// Failures during the reindex are logged, not returned.
#[instrument(skip(state))]
pub async fn reindex(
    State(state): State<AppState>,
    Json(request): Json<ReindexRequest>,
) -> Result<(axum::http::StatusCode, Json<MessageResponse>), ApiError> {
    if state.scanner.is_scanning() {
        return Err(IndexerError::ScanInProgress.into());
    }

    let block = request.block_number;
    let scanner = state.scanner.clone();
    tokio::spawn(async move {
        match scanner.reindex_from_block(block).await {
            Ok(last) => info!(from = block, last_block = ?last, "Reindex finished"),
            Err(e) => error!(from = block, error = %e, "Reindex failed"),
        }
    });

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(MessageResponse::new(format!("Reindex from block {block} started"))),
    ))
}
