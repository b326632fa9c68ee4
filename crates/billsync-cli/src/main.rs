use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use billsync_sync::{run_sync_once_from_env, validate, SyncConfig, SyncMode};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "billsync")]
#[command(about = "Mirror Washington State legislative bills into a local JSON dataset")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch new and stale bills and rewrite the dataset
    Sync {
        /// Ignore the manifest and re-fetch every roster entry
        #[arg(long)]
        full: bool,
    },
    /// Check the persisted dataset for structural problems and data loss
    Validate {
        #[arg(long)]
        bills: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Sync { full: false }) {
        Commands::Sync { full } => {
            let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
            let summary = run_sync_once_from_env(mode).await?;
            println!(
                "sync complete: mode={} new={} stale_checked={} changed={} failures={} total={}",
                summary.mode.as_str(),
                summary.new_fetched,
                summary.stale_checked,
                summary.changed,
                summary.failures,
                summary.total_bills
            );
            if !summary.validation_errors.is_empty() {
                eprintln!("{} validation error(s) after sync", summary.validation_errors.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { bills, manifest } => {
            let config = SyncConfig::from_env();
            let bills = bills.unwrap_or_else(|| config.data_dir.join("bills.json"));
            let manifest = manifest.unwrap_or_else(|| config.data_dir.join("manifest.json"));
            info!(bills = %bills.display(), manifest = %manifest.display(), "validating dataset");

            let errors = validate(&bills, &manifest);
            if errors.is_empty() {
                println!("validation passed: {}", bills.display());
                return Ok(ExitCode::SUCCESS);
            }
            println!("validation failed with {} error(s):", errors.len());
            for error in &errors {
                println!("  - {error}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
