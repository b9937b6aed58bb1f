//! utxoindex CLI: run the indexer and inspect the ledger.
//!
//! # Commands
//! ```text
//! utxoindex run
//! utxoindex tip
//! utxoindex track   <address> --user <id>
//! utxoindex balance <address> [--min-confirmations <n>]
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use utxoindex_bitcoin::IndexerBuilder;
use utxoindex_core::Balance;
use utxoindex_rpc::BitcoindClient;

mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "utxoindex",
    about = "Reorg-safe Bitcoin address indexer",
    long_about = "
Follows a bitcoind node, records every transaction and unspent output that
touches a tracked address, and unwinds the ledger when the node reorganizes.

ENVIRONMENT VARIABLES:
  UTXOINDEX_CONFIG        Path to the YAML config file
  UTXOINDEX_RPC_URL       bitcoind JSON-RPC URL
  UTXOINDEX_RPC_USER      bitcoind RPC user
  UTXOINDEX_RPC_PASSWORD  bitcoind RPC password
  UTXOINDEX_DATABASE_URL  Ledger database (sqlite path/URL, postgres:// URL, or 'memory')
  UTXOINDEX_LOG           Log level (overridden by RUST_LOG)
",
    version
)]
struct Cli {
    /// YAML config file
    #[arg(short, long, global = true, env = "UTXOINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// bitcoind JSON-RPC URL
    #[arg(long, global = true, env = "UTXOINDEX_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, global = true, env = "UTXOINDEX_RPC_USER")]
    rpc_user: Option<String>,

    #[arg(long, global = true, env = "UTXOINDEX_RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,

    /// Ledger database URL
    #[arg(long, global = true, env = "UTXOINDEX_DATABASE_URL")]
    database_url: Option<String>,

    /// Global log level
    #[arg(long, global = true, env = "UTXOINDEX_LOG")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the node until interrupted
    Run {
        /// First height to index on an empty ledger
        #[arg(long)]
        start_height: Option<u64>,
        /// Maximum reorg depth searched for a common ancestor
        #[arg(long)]
        max_reorg_depth: Option<u64>,
        /// Poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Skip gettxoutproof checks
        #[arg(long)]
        no_merkle_proofs: bool,
    },

    /// Show the highest indexed block
    Tip {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register an address for indexing
    Track {
        address: String,
        /// Owning user id
        #[arg(long)]
        user: i64,
    },

    /// Confirmed and total unspent balance of a tracked address
    Balance {
        address: String,
        /// Confirmations required to count as confirmed
        #[arg(long, default_value_t = 1)]
        min_confirmations: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Load the config file and apply flag / env overrides on top.
    fn resolve_config(&self) -> Result<AppConfig> {
        let mut cfg = AppConfig::load(self.config.as_deref())?;
        if let Some(url) = &self.rpc_url {
            cfg.bitcoin.url = url.clone();
        }
        if let Some(user) = &self.rpc_user {
            cfg.bitcoin.user = Some(user.clone());
        }
        if let Some(password) = &self.rpc_password {
            cfg.bitcoin.password = Some(password.clone());
        }
        if let Some(url) = &self.database_url {
            cfg.database.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            cfg.log.level = level.clone();
        }
        if self.json_logs {
            cfg.log.json = true;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = cli.resolve_config()?;
    logging::init_tracing(&cfg.log);

    match cli.command {
        Commands::Run {
            start_height,
            max_reorg_depth,
            poll_interval_ms,
            no_merkle_proofs,
        } => {
            if let Some(height) = start_height {
                cfg.indexer.start_height = height;
            }
            if let Some(depth) = max_reorg_depth {
                cfg.indexer.max_reorg_depth = depth;
            }
            if let Some(ms) = poll_interval_ms {
                cfg.indexer.poll_interval_ms = ms;
            }
            if no_merkle_proofs {
                cfg.indexer.verify_merkle_proofs = false;
            }
            cmd_run(cfg).await
        }
        Commands::Tip { json } => cmd_tip(&cfg, json).await,
        Commands::Track { address, user } => cmd_track(&cfg, &address, user).await,
        Commands::Balance {
            address,
            min_confirmations,
            json,
        } => cmd_balance(&cfg, &address, min_confirmations, json).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(cfg: AppConfig) -> Result<()> {
    let store = cfg.database.open().await?;
    let node = BitcoindClient::http(cfg.bitcoin.url.clone(), cfg.bitcoin.client_config())
        .context("build bitcoind RPC client")?;

    tracing::info!(
        rpc = %cfg.bitcoin.url,
        backend = ?cfg.database.backend(),
        "starting utxoindex"
    );

    let mut indexer = IndexerBuilder::from_config(cfg.indexer).build(node, store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, finishing current tick"),
            Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    indexer.run(shutdown_rx).await;
    Ok(())
}

async fn cmd_tip(cfg: &AppConfig, as_json: bool) -> Result<()> {
    let store = cfg.database.open().await?;
    let tip = store.tip().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&tip)?);
        return Ok(());
    }
    match tip {
        Some(header) => {
            println!("Height:    {}", header.height);
            println!("Hash:      {}", header.hash);
            println!("Previous:  {}", header.previous_hash);
            println!("Timestamp: {}", header.timestamp);
        }
        None => println!("Ledger is empty"),
    }
    Ok(())
}

async fn cmd_track(cfg: &AppConfig, address: &str, user: i64) -> Result<()> {
    let address = address.trim();
    if address.is_empty() {
        bail!("address must not be empty");
    }
    let store = cfg.database.open().await?;
    let tracked = store.insert_address(user, address).await?;
    println!(
        "Tracking {} (id {}, user {})",
        tracked.address, tracked.id, tracked.user_id
    );
    Ok(())
}

async fn cmd_balance(
    cfg: &AppConfig,
    address: &str,
    min_confirmations: u64,
    as_json: bool,
) -> Result<()> {
    let store = cfg.database.open().await?;
    let tracked = store
        .address_by_string(address)
        .await?
        .with_context(|| format!("address '{address}' is not tracked"))?;
    let tip_height = store.tip().await?.map_or(0, |t| t.height);
    let utxos = store.utxos_by_address(tracked.id).await?;
    let balance = Balance::from_utxos(&utxos, tip_height, min_confirmations);

    if as_json {
        let out = serde_json::json!({
            "address": tracked.address,
            "tip_height": tip_height,
            "min_confirmations": min_confirmations,
            "balance": balance,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Address:    {}", tracked.address);
        println!("Confirmed:  {} sat", balance.confirmed);
        println!("Total:      {} sat", balance.total);
        println!("UTXOs:      {}", balance.utxo_count);
        println!("Tip height: {tip_height}");
    }
    Ok(())
}
