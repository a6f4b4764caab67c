//! Custom extractors for API parameters.

use alloy::primitives::Address;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use crate::api::middleware::error::ApiError;
use crate::config::parse_address;

/// A validated `0x` + 40 hex address taken from the last path segment.
///
/// Anything else is rejected with 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParam(pub Address);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AddressParam
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        parse_address(&raw).map(Self).map_err(ApiError::from)
    }
}
