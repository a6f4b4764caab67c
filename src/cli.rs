//! Operator command-line interface.
//!
//! # Commands
//!
//! - `run`: start the indexer service with the control API
//! - `scan`: run a single scanner tick
//! - `reindex`: rescan from a block
//! - `prices`: run one price resolution cycle
//! - `status`: print the scanner status
//! - `add-pool` / `remove-pool`: manage tracked pools
//! - `seed-tokens`: load token metadata from a JSON file
//!
//! # Example
//!
//! ```bash
//! dex-pool-indexer status
//! dex-pool-indexer reindex --from 19000000
//! dex-pool-indexer seed-tokens tokens.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::config::{parse_address, Config};
use crate::db::models::TokenRecord;
use crate::error::{IndexerError, IndexerResult};
use crate::indexer::scanner::BatchReport;
use crate::indexer::{AddPoolOutcome, BlockScanner, PoolLifecycleManager, ScannerSettings, TickOutcome};
use crate::pricing::{CycleReport, PriceResolutionEngine, PriceSource};
use crate::service::{Gateways, IndexerService};

/// DEX pool indexer and price resolution service
#[derive(Parser, Debug)]
#[command(name = "dex-pool-indexer")]
#[command(about = "Indexes DEX pool events and resolves USD token prices", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the indexer, price engine and control API until ctrl-c
    Run,

    /// Index the next confirmed batch once
    Scan,

    /// Rescan from a block up to the confirmed head
    Reindex {
        /// First block to rescan
        #[arg(short, long)]
        from: u64,
    },

    /// Run one price resolution cycle and print the prices
    Prices,

    /// Print cursor position, chain head and health
    Status,

    /// Start tracking a pool
    AddPool {
        /// Pool contract address
        address: String,
    },

    /// Stop tracking a pool
    RemovePool {
        /// Pool contract address
        address: String,
    },

    /// Load token metadata from a JSON array file
    SeedTokens {
        /// Path to the JSON file
        file: PathBuf,
    },
}

/// One entry of a token seed file.
#[derive(Debug, Deserialize)]
struct SeedToken {
    address: String,
    symbol: String,
    name: String,
    decimals: u8,
    #[serde(default)]
    coingecko_id: Option<String>,
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration loading, a backend connection or the
/// command itself fails.
pub async fn run() -> IndexerResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => IndexerService::build(&config).await?.run().await,
        Commands::Scan => run_scan_command(&config).await,
        Commands::Reindex { from } => run_reindex_command(&config, from).await,
        Commands::Prices => run_prices_command(&config).await,
        Commands::Status => run_status_command(&config).await,
        Commands::AddPool { address } => run_add_pool_command(&config, &address).await,
        Commands::RemovePool { address } => run_remove_pool_command(&config, &address).await,
        Commands::SeedTokens { file } => run_seed_command(&config, &file).await,
    }
}

/// Scanner over freshly connected gateways, without real-time subscriptions.
async fn one_shot_scanner(config: &Config) -> IndexerResult<(Gateways, Arc<BlockScanner>)> {
    let gateways = Gateways::connect(config).await?;
    let pools = Arc::new(PoolLifecycleManager::new(
        gateways.chain.clone(),
        gateways.storage.clone(),
        config.factory_address(),
        None,
    ));
    pools.load_tracked().await?;
    let scanner = Arc::new(BlockScanner::new(
        gateways.chain.clone(),
        gateways.storage.clone(),
        pools,
        ScannerSettings::from_config(config),
    ));
    Ok((gateways, scanner))
}

async fn run_scan_command(config: &Config) -> IndexerResult<()> {
    let (_, scanner) = one_shot_scanner(config).await?;

    match scanner.tick().await? {
        TickOutcome::Advanced(report) => print_batch(&report),
        TickOutcome::NoNewBlocks { head } => {
            println!("{} No confirmed blocks to index (head {head})", "⏸".yellow());
        }
        TickOutcome::Paused | TickOutcome::Busy => {
            println!("{}", "Scanner unavailable".yellow().bold());
        }
    }
    Ok(())
}

async fn run_reindex_command(config: &Config, from: u64) -> IndexerResult<()> {
    let (_, scanner) = one_shot_scanner(config).await?;
    println!("{} Reindexing from block {}", "🔁".cyan(), from.to_string().yellow());

    match scanner.reindex_from_block(from).await? {
        Some(last) => println!(
            "{} Reindex complete, cursor at {}",
            "✅".green(),
            last.to_string().yellow()
        ),
        None => println!("{}", "Reindex complete, no confirmed blocks yet".yellow()),
    }
    Ok(())
}

async fn run_prices_command(config: &Config) -> IndexerResult<()> {
    let gateways = Gateways::connect(config).await?;
    let engine = PriceResolutionEngine::new(gateways.storage.clone(), gateways.oracle.clone());

    let report = engine.run_cycle().await?;
    print_prices(&report);
    Ok(())
}

async fn run_status_command(config: &Config) -> IndexerResult<()> {
    let (_, scanner) = one_shot_scanner(config).await?;
    let status = scanner.get_status().await;

    let health = if status.is_healthy {
        "healthy".green().bold()
    } else {
        "unhealthy".red().bold()
    };
    println!("{} Indexer {}", "📊".cyan(), health);
    println!("  chain head:     {}", display_block(status.current_chain_block));
    println!("  last indexed:   {}", display_block(status.last_indexed_block));
    println!("  blocks behind:  {}", display_block(status.blocks_behind));
    println!(
        "  tracked pools:  {}",
        scanner.pools().tracked_pools().await.len().to_string().yellow()
    );
    Ok(())
}

async fn run_add_pool_command(config: &Config, address: &str) -> IndexerResult<()> {
    let address = parse_address(address)?;
    let (_, scanner) = one_shot_scanner(config).await?;

    let outcome = scanner.pools().add_pool_manually(address).await?;
    let message = match outcome {
        AddPoolOutcome::Added => "added".green(),
        AddPoolOutcome::Reactivated => "reactivated".green(),
        AddPoolOutcome::AlreadyTracked => "already tracked".yellow(),
    };
    println!("{} Pool {address} {message}", "➕".cyan());
    Ok(())
}

async fn run_remove_pool_command(config: &Config, address: &str) -> IndexerResult<()> {
    let address = parse_address(address)?;
    let (_, scanner) = one_shot_scanner(config).await?;

    scanner.pools().remove_pool(address).await?;
    println!("{} Pool {address} removed", "➖".cyan());
    Ok(())
}

async fn run_seed_command(config: &Config, file: &Path) -> IndexerResult<()> {
    let tokens = load_seed_tokens(file)?;
    let gateways = Gateways::connect(config).await?;

    for token in &tokens {
        gateways.storage.upsert_token(token).await?;
    }
    info!(count = tokens.len(), file = %file.display(), "Tokens seeded");
    println!(
        "{} Seeded {} tokens from {}",
        "✅".green(),
        tokens.len().to_string().yellow(),
        file.display()
    );
    Ok(())
}

/// Read and validate a token seed file.
fn load_seed_tokens(file: &Path) -> IndexerResult<Vec<TokenRecord>> {
    let raw = std::fs::read_to_string(file).map_err(|e| {
        IndexerError::config(format!("Failed to read {}", file.display()), Some(Box::new(e)))
    })?;
    let entries: Vec<SeedToken> = serde_json::from_str(&raw).map_err(|e| {
        IndexerError::config(format!("Invalid token file {}", file.display()), Some(Box::new(e)))
    })?;

    entries
        .into_iter()
        .map(|entry| {
            let address = parse_address(&entry.address)?;
            Ok(TokenRecord::new(
                address,
                entry.symbol,
                entry.name,
                entry.decimals,
                entry.coingecko_id,
            ))
        })
        .collect()
}

fn print_batch(report: &BatchReport) {
    println!(
        "{} Blocks {}..={} | pools {} | swaps {} | liquidity {} | new pools {}",
        "📦".cyan(),
        report.from_block.to_string().yellow(),
        report.to_block.to_string().yellow(),
        report.pools_scanned,
        report.events.swaps.to_string().green(),
        report.events.liquidity_events,
        report.pools_created,
    );
    for failure in &report.failures {
        println!("  {} {}: {}", "⚠️".red(), failure.pool, failure.error);
    }
    if report.reorg.is_some() {
        println!("  {}", "Reorg recovered before this batch".yellow());
    }
}

fn print_prices(report: &CycleReport) {
    let mut tokens: Vec<(&String, &Decimal)> = report.prices.iter().collect();
    tokens.sort_by(|a, b| a.0.cmp(b.0));

    for (token, price) in tokens {
        let source = match report.sources.get(token) {
            Some(PriceSource::Oracle) => "oracle".blue(),
            Some(PriceSource::Pool { pass }) => format!("pool pass {pass}").magenta(),
            Some(PriceSource::Path { hops }) => format!("path {hops} hops").cyan(),
            None => "unknown".dimmed(),
        };
        println!("{token}  {}  ({source})", format!("${}", price.round_dp(6)).green().bold());
    }
    for token in &report.unpriced {
        println!("{token}  {}", "unpriced".red());
    }
    if report.oracle_backoff {
        println!("{}", "Oracle backed off this cycle".yellow());
    }
}

fn display_block(block: Option<u64>) -> String {
    block.map_or_else(|| "n/a".dimmed().to_string(), |b| b.to_string().yellow().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parsing() {
        for args in [
            vec!["dex-pool-indexer", "run"],
            vec!["dex-pool-indexer", "scan"],
            vec!["dex-pool-indexer", "prices"],
            vec!["dex-pool-indexer", "status"],
        ] {
            assert!(Cli::try_parse_from(args).is_ok());
        }
    }

    #[test]
    fn test_reindex_requires_block() {
        assert!(Cli::try_parse_from(["dex-pool-indexer", "reindex"]).is_err());

        let cli = Cli::try_parse_from(["dex-pool-indexer", "reindex", "--from", "19000000"]);
        assert!(matches!(
            cli,
            Ok(Cli {
                command: Commands::Reindex { from: 19_000_000 }
            })
        ));
    }

    #[test]
    fn test_add_pool_takes_address() {
        let cli = Cli::try_parse_from(["dex-pool-indexer", "add-pool", "0xabc"]);
        assert!(matches!(
            cli,
            Ok(Cli {
                command: Commands::AddPool { ref address }
            }) if address == "0xabc"
        ));
    }

    #[test]
    fn test_load_seed_tokens() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "symbol": "USDC",
                  "name": "USD Coin", "decimals": 6, "coingecko_id": "usd-coin"}},
                {{"address": "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "symbol": "WBTC",
                  "name": "Wrapped BTC", "decimals": 8}}
            ]"#
        )
        .unwrap();

        let tokens = load_seed_tokens(file.path()).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(tokens[0].coingecko_id.as_deref(), Some("usd-coin"));
        assert_eq!(tokens[1].decimals, 8);
        assert!(tokens[1].coingecko_id.is_none());
    }

    #[test]
    fn test_seed_rejects_bad_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"address": "0x1234", "symbol": "X", "name": "X", "decimals": 18}}]"#
        )
        .unwrap();

        let err = load_seed_tokens(file.path()).unwrap_err();
        assert!(matches!(err, IndexerError::ValidationError { .. }));
    }
}
