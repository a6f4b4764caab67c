//! Pool management endpoints.

use axum::{extract::State, http::StatusCode, Json};
use tracing::{info, instrument};

use crate::api::extractors::AddressParam;
use crate::api::middleware::error::ApiError;
use crate::api::models::{AddPoolRequest, AddPoolResponse, ErrorResponse, MessageResponse, PoolInfo};
use crate::app_state::AppState;
use crate::config::parse_address;
use crate::db::models::address_key;
use crate::indexer::AddPoolOutcome;

#[utoipa::path(
    get,
    path = "/api/v1/pools",
    responses(
        (status = 200, description = "Active pools", body = Vec<PoolInfo>)
    ),
    tag = "Pools"
)]
/// Returns every active pool.
#[instrument(skip(state))]
pub async fn list_pools(State(state): State<AppState>) -> Result<Json<Vec<PoolInfo>>, ApiError> {
    let pools = state.storage.list_active_pools().await?;
    Ok(Json(pools.into_iter().map(PoolInfo::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/pools",
    request_body = AddPoolRequest,
    responses(
        (status = 201, description = "Pool added or reactivated", body = AddPoolResponse),
        (status = 200, description = "Pool already tracked", body = AddPoolResponse),
        (status = 400, description = "Invalid address or unknown token", body = ErrorResponse)
    ),
    tag = "Pools"
)]
/// Reads a pool contract and starts tracking it.
#[instrument(skip(state, request), fields(address = %request.address))]
pub async fn add_pool(
    State(state): State<AppState>,
    Json(request): Json<AddPoolRequest>,
) -> Result<(StatusCode, Json<AddPoolResponse>), ApiError> {
    let address = parse_address(&request.address)?;
    let outcome = state.pools.add_pool_manually(address).await?;
    info!(pool = %address, ?outcome, "Manual pool add");

    let (status, label) = match outcome {
        AddPoolOutcome::Added => (StatusCode::CREATED, "added"),
        AddPoolOutcome::Reactivated => (StatusCode::CREATED, "reactivated"),
        AddPoolOutcome::AlreadyTracked => (StatusCode::OK, "already_tracked"),
    };
    Ok((
        status,
        Json(AddPoolResponse {
            address: address_key(&address),
            outcome: label.to_string(),
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/pools/{address}",
    params(
        ("address" = String, Path, description = "Pool address")
    ),
    responses(
        (status = 200, description = "Pool removed", body = MessageResponse),
        (status = 400, description = "Invalid address", body = ErrorResponse),
        (status = 404, description = "Pool not tracked", body = ErrorResponse)
    ),
    tag = "Pools"
)]
/// Deactivates a pool and stops its subscription. History is kept.
#[instrument(skip(state))]
pub async fn remove_pool(
    State(state): State<AppState>,
    AddressParam(address): AddressParam,
) -> Result<Json<MessageResponse>, ApiError> {
    state.pools.remove_pool(address).await?;
    Ok(Json(MessageResponse::new(format!(
        "Pool {} removed",
        address_key(&address)
    ))))
}
