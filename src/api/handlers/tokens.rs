//! Token price endpoint.

use axum::{extract::State, Json};
use tracing::instrument;

use crate::api::extractors::AddressParam;
use crate::api::middleware::error::ApiError;
use crate::api::models::{ErrorResponse, TokenPriceResponse};
use crate::app_state::AppState;
use crate::db::models::address_key;

#[utoipa::path(
    get,
    path = "/api/v1/tokens/{address}/price",
    params(
        ("address" = String, Path, description = "Token address")
    ),
    responses(
        (status = 200, description = "Latest resolved price", body = TokenPriceResponse),
        (status = 400, description = "Invalid address", body = ErrorResponse),
        (status = 404, description = "Token never priced", body = ErrorResponse)
    ),
    tag = "Tokens"
)]
/// Returns the latest price statistic of a token.
#[instrument(skip(state))]
pub async fn get_token_price(
    State(state): State<AppState>,
    AddressParam(address): AddressParam,
) -> Result<Json<TokenPriceResponse>, ApiError> {
    let key = address_key(&address);
    let stat = state
        .storage
        .latest_token_statistic(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No price for token {key}")))?;
    Ok(Json(stat.into()))
}
