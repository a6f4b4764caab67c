//! Binary entry point for the DEX pool indexer.
//!
//! ```text
//! main.rs      runtime + tracing
//!     ↓
//! cli.rs       argument parsing, one-shot commands
//!     ↓
//! service.rs   gateways, scanner/price/real-time loops, control API
//! ```

use dex_pool_indexer::{cli, observability};
use tracing::error;

/// Initializes tracing from `RUST_LOG`, `LOG_FILE` and `LOG_JSON`, then hands
/// over to the CLI.
#[tokio::main]
async fn main() {
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    // Dropping the guard flushes the file appender, so it lives until exit.
    let _log_guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
