//! HTTP control API: status, pause/resume, reindex, pool management and
//! token prices under `/api/v1`, with Swagger UI at `/swagger-ui`.

pub mod docs;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod server;

pub use server::{build_router, run_server, ServerSettings};
