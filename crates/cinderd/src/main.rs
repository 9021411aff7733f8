//! cinderd - route traffic to anything that speaks the Graphite Carbon
//! protocol (plain text or pickle).
//!
//! ```bash
//! cinderd --config /etc/cinder.toml
//! ```

mod restart;
mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cinder_config::Config;

/// cinder - Graphite Carbon metric relay
#[derive(Parser, Debug)]
#[command(name = "cinderd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/cinder.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("cannot use config file '{}'", cli.config.display()))?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or_else(|| config.log_level.as_str());
    init_logging(level)?;

    serve::run(config).await
}

/// Initialize the tracing subscriber.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}
