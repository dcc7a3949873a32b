//! mjpeg-relay CLI
//!
//! Serves every camera in the config file from one HTTP listener.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mjpeg_relay::upstream::HttpMjpegConnector;
use mjpeg_relay::{RelayConfig, RelayServer, SessionRegistry};

#[derive(Parser)]
#[command(name = "mjpeg-relay")]
#[command(about = "On-demand MJPEG camera relay")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "mjpeg_relay=info,tower_http=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?,
        )
        .init();

    let config = RelayConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let mut server_config = config.server_config();
    if let Some(bind) = cli.bind {
        server_config = server_config.bind(bind);
    }
    let session_config = config.session_config();

    if config.sources.is_empty() {
        tracing::warn!("No cameras configured");
    }
    for source in &config.sources {
        tracing::info!(camera = %source.id, url = %source.url, "Camera configured");
    }

    let connector = HttpMjpegConnector::new(
        session_config.read_timeout,
        session_config.max_frame_size,
    )?;
    let registry = SessionRegistry::new(config.sources, Arc::new(connector), session_config)?;

    let server = RelayServer::new(server_config, Arc::new(registry));
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
