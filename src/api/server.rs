//! Axum server setup and routing.

use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{docs::ApiDoc, handlers, middleware as api_middleware};
use crate::app_state::AppState;
use crate::error::{IndexerError, IndexerResult};

/// Control API settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen port
    pub port: u16,
    /// Requests per minute across all clients
    pub rate_limit_rpm: u32,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

/// Build the router with every route and middleware layer.
pub fn build_router(state: AppState, rate_limit_rpm: u32, cors_origins: Vec<String>) -> Router {
    let limiter = api_middleware::rate_limit::create_rate_limiter(rate_limit_rpm);

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/status", get(handlers::indexer::get_status))
        .route("/pause", post(handlers::indexer::pause))
        .route("/resume", post(handlers::indexer::resume))
        .route("/reindex", post(handlers::indexer::reindex))
        .route(
            "/pools",
            get(handlers::pools::list_pools).post(handlers::pools::add_pool),
        )
        .route("/pools/:address", delete(handlers::pools::remove_pool))
        .route("/tokens/:address/price", get(handlers::tokens::get_token_price));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(cors_origins))
        .layer(middleware::from_fn(api_middleware::logging::log_requests))
        .layer(middleware::from_fn(move |req, next| {
            api_middleware::rate_limit::rate_limit(limiter.clone(), req, next)
        }));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes)
        .layer(middleware_stack)
        .with_state(state)
}

/// Serve the control API until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns a config error if the port cannot be bound.
pub async fn run_server(
    state: AppState,
    settings: ServerSettings,
    mut shutdown: watch::Receiver<bool>,
) -> IndexerResult<()> {
    let app = build_router(state, settings.rate_limit_rpm, settings.cors_origins);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        IndexerError::config(format!("Failed to bind API server to {addr}"), Some(Box::new(e)))
    })?;
    info!(addr = %addr, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| IndexerError::state("API server failed", Some(Box::new(e))))?;

    info!("API server stopped");
    Ok(())
}

fn build_cors_layer(origins: Vec<String>) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new().allow_origin(allowed)
    }
}
