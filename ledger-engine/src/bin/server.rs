//! Ledger server binary
//!
//! Opens the ledger (running recovery) and keeps it alive until Ctrl-C.
//! Configuration comes from the TOML file given as the first argument,
//! otherwise from `LEDGER_*` environment variables.

use anyhow::Context;
use ledger_engine::{Config, Ledger};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting ledger server"
    );

    let ledger = Ledger::open(config).await.context("opening ledger")?;

    let stats = ledger.stats()?;
    tracing::info!(
        accounts = ledger.query(|view| view.account_count()),
        last_sequence = stats.last_sequence,
        journaled_commands = stats.journaled_commands,
        snapshot_sequence = ?stats.snapshot_sequence,
        "Ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
