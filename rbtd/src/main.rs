//! Remote Build Trigger - build daemon.
//!
//! Long-running TCP server that accepts authenticated command envelopes,
//! serves the project registry, and runs registered build commands.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rbt_common::DEFAULT_PORT;
use rbt_common::config::ConfigStore;
use rbtd::server::Daemon;

#[derive(Parser)]
#[command(name = "rbtd")]
#[command(author, version, about = "RBT daemon - remote build execution")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to the registry file (defaults to the per-user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default()?,
    };
    store.ensure_initialized()?;
    info!(registry = %store.path().display(), "registry ready");

    let daemon = Daemon::bind(("0.0.0.0", cli.port), store).await?;
    daemon.run().await?;

    info!("daemon stopped");
    Ok(())
}
