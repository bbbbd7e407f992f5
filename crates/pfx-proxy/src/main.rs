//! pfx-proxy entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Relay FIX market data to a Pyth oracle daemon.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "PFX_CONFIG", default_value = "config/default.toml")]
    config: String,

    /// Oracle address (host:port or ws:// URL), overrides oracle.url
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    pfx_telemetry::init_logging()?;

    info!("Starting pfx-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let mut config = pfx_proxy::AppConfig::from_file(&args.config)?;
    if let Some(addr) = &args.addr {
        config.override_addr(addr);
    }
    info!(oracle = %config.oracle.url, session = ?config.session.kind, "Configuration loaded");

    let app = pfx_proxy::Application::new(config)?;
    let report = app.run().await?;

    info!(trigger = %report.trigger, "pfx-proxy stopped");
    Ok(())
}
