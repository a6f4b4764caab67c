//! OpenAPI documentation for the control API.

use utoipa::OpenApi;

use crate::api::handlers;

/// OpenAPI documentation for the control API.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::indexer::get_status,
        handlers::indexer::pause,
        handlers::indexer::resume,
        handlers::indexer::reindex,
        handlers::pools::list_pools,
        handlers::pools::add_pool,
        handlers::pools::remove_pool,
        handlers::tokens::get_token_price,
    ),
    components(schemas(
        crate::api::models::HealthResponse,
        crate::api::models::HealthStatus,
        crate::api::models::StatusResponse,
        crate::api::models::MessageResponse,
        crate::api::models::ReindexRequest,
        crate::api::models::AddPoolRequest,
        crate::api::models::AddPoolResponse,
        crate::api::models::PoolInfo,
        crate::api::models::TokenPriceResponse,
        crate::api::models::ErrorResponse,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Indexer", description = "Scanner status and control"),
        (name = "Pools", description = "Pool management"),
        (name = "Tokens", description = "Resolved token prices"),
    ),
    info(
        title = "DEX Pool Indexer API",
        version = "1.0.0",
        description = "Control surface for the pool indexer and price resolution engine",
    )
)]
pub struct ApiDoc;
