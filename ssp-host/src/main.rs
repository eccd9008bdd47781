//! SSP host entry point.
//!
//! ```text
//! ssp-host                      Run the configured sources
//! ssp-host --config <path>      Load a custom config TOML
//! ssp-host --connector <path>   Override the connector executable
//! ssp-host --gen-config         Write a sample config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ssp_host::config::HostConfig;
use ssp_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ssp-host", about = "Headless SSP camera ingest host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ssp-host.toml")]
    config: PathBuf,

    /// Connector executable, overrides `[connector] path`.
    #[arg(long)]
    connector: Option<PathBuf>,

    /// Print a sample configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::sample())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = HostConfig::load(&cli.config);
    if let Some(path) = cli.connector {
        config.connector.path = path.display().to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ssp-host v{}", env!("CARGO_PKG_VERSION"));
    info!("connector: {} (port {})", config.connector.path, config.connector.port);
    info!("reconnect delays: {:?}s", config.reconnect.delays_secs);
    info!("sources: {}", config.sources.len());

    let mut service = HostService::new(config)?;
    service
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await;

    Ok(())
}
