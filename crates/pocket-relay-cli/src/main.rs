//! Run a pocket relay node until interrupted.

use anyhow::Context;
use clap::Parser;
use pocket_relay::{RelayConfig, RelayServer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pocket-relay")]
#[command(about = "Relay node for public-key-addressed pockets", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (all interfaces)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Comma-separated peer relay URLs
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    peers: Option<Vec<String>>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(peers) = &self.peers {
            // `PEERS=""` and trailing commas yield empty entries.
            config = config.with_peers(
                peers
                    .iter()
                    .map(|peer| peer.trim())
                    .filter(|peer| !peer.is_empty()),
            );
        }

        config.validate().context("invalid relay configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.relay_config()?;
    let relay = RelayServer::new(config)
        .start()
        .await
        .context("starting relay")?;
    info!(url = %relay.url(), "Relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    relay.shutdown().await;
    Ok(())
}
