//! Harvest Verifier CLI
//!
//! Captures balance snapshots of a vault deployment and verifies harvests
//! against a strategy variant's accounting policy.
//!
//! # Usage
//!
//! ```bash
//! harvest_verify variants
//! harvest_verify snapshot   --config deploy.toml --block 17000000 --out before.json
//! harvest_verify verify     --config deploy.toml --before before.json --after after.json --events events.json
//! harvest_verify verify-tx  --config deploy.toml --tx 0xabc...
//! ```
//!
//! Environment Variables:
//!   HARVEST_RPC_URL - JSON-RPC endpoint (overrides `[rpc] url`)
//!
//! # Exit Codes
//!
//! - 0: Harvest verified
//! - 1: Invariant violation
//! - 2: Configuration, read or decode error

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use harvest_verifier::verifier::{
    available_variants, block_is_shared, check_ordering, render_comparison, verify_records,
    CaptureRecord, ChainReader, EventLog, HarvestDriver, HarvestSession, JsonRpcReader,
    ReceiptDriver, SnapshotDiff, VerifierConfig, VerifierError,
};

#[derive(Parser, Debug)]
#[command(name = "harvest_verify")]
#[command(about = "Verify vault strategy harvest accounting")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// JSON-RPC endpoint
    #[arg(long, env = "HARVEST_RPC_URL", global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in strategy variants
    Variants,
    /// Capture a snapshot and write it as JSON
    Snapshot {
        #[arg(short, long)]
        config: PathBuf,
        /// Block to capture at (default: latest)
        #[arg(short, long)]
        block: Option<u64>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Verify stored before/after captures and an event log
    Verify {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        before: PathBuf,
        #[arg(long)]
        after: PathBuf,
        #[arg(long)]
        events: PathBuf,
    },
    /// Verify a mined harvest transaction
    VerifyTx {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        tx: String,
    },
}

// =============================================================================
// MAIN
// =============================================================================

fn main() {
    // `.env` must be loaded before clap reads HARVEST_RPC_URL.
    dotenv::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to install logger: {}", e);
        std::process::exit(2);
    }

    if let Err(err) = run(args) {
        match err.downcast_ref::<VerifierError>().and_then(|e| e.violation()) {
            Some(violation) => {
                print!("{}", violation.format_text());
                std::process::exit(1);
            }
            None => {
                eprintln!("Error: {:#}", err);
                std::process::exit(2);
            }
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Variants => {
            let variants = available_variants();
            let mut names: Vec<_> = variants.keys().copied().collect();
            names.sort_unstable();
            for name in names {
                println!("{:<18} {}", name, variants[name]);
            }
            Ok(())
        }
        Command::Snapshot { config, block, out } => {
            snapshot(&config, args.rpc_url.as_deref(), block, out.as_deref())
        }
        Command::Verify {
            config,
            before,
            after,
            events,
        } => verify(&config, &before, &after, &events),
        Command::VerifyTx { config, tx } => verify_tx(&config, args.rpc_url.as_deref(), &tx),
    }
}

fn load_config(path: &Path) -> anyhow::Result<VerifierConfig> {
    info!("Loading config from {}", path.display());
    Ok(VerifierConfig::load(path)?)
}

fn connect(config: &VerifierConfig, rpc_url: Option<&str>) -> anyhow::Result<JsonRpcReader> {
    let url = config.rpc_url(rpc_url)?;
    info!(url = %url, "Connecting to RPC");
    Ok(JsonRpcReader::new(&url, config.rpc.timeout())?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

// =============================================================================
// COMMANDS
// =============================================================================

fn snapshot(
    config_path: &Path,
    rpc_url: Option<&str>,
    block: Option<u64>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let policy = config.policy()?;
    let reader = connect(&config, rpc_url)?;
    let block = match block {
        Some(b) => b,
        None => reader.block_number()?,
    };

    let session = HarvestSession::open_at(
        &reader,
        &policy,
        config.deployment.vault.clone(),
        config.deployment.strategy.clone(),
        block,
    )?;
    let record = session.record(session.capture_at(block)?);
    let json = serde_json::to_string_pretty(&record)?;

    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                block,
                fingerprint = %record.snapshot.fingerprint(),
                "Snapshot written to {}",
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn verify(config_path: &Path, before: &Path, after: &Path, events: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let policy = config.policy()?;
    let before: CaptureRecord = read_json(before)?;
    let after: CaptureRecord = read_json(after)?;
    let events: EventLog = read_json(events)?;

    let diff = SnapshotDiff::new(&before.snapshot, &after.snapshot)?;
    println!("{}", render_comparison(&diff, config.report.show_unchanged));
    let report = verify_records(&policy, &before, &after, &events)?;
    print!("{}", report.format_text());
    Ok(())
}

fn verify_tx(config_path: &Path, rpc_url: Option<&str>, tx: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let policy = config.policy()?;
    let reader = connect(&config, rpc_url)?;

    let outcome = ReceiptDriver::new(&reader, tx)?.execute()?;
    let block = outcome
        .block
        .context("receipt carries no block number")?;
    let prior = block
        .checked_sub(1)
        .context("harvest in genesis block has no prior state")?;

    let session = HarvestSession::open_at(
        &reader,
        &policy,
        config.deployment.vault.clone(),
        config.deployment.strategy.clone(),
        prior,
    )?;
    block_is_shared(&reader, block);
    let before = session.capture_at(prior)?;
    let after = session.capture_at(block)?;
    check_ordering(&before, Some(block), &after)?;

    let diff = SnapshotDiff::new(&before, &after)?;
    println!("{}", render_comparison(&diff, config.report.show_unchanged));
    let report = session.checker()?.check(&before, &after, &outcome.events)?;
    print!("{}", report.format_text());
    Ok(())
}
