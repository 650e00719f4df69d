//! a3s-forward-proxy: serves `GET /?url=<target>` for remote direct fetches.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use a3s_websearch::forward::{self, PROXY_NAME};
use a3s_websearch::Config;

/// Stateless forwarding proxy with allow-list and private-host checks
#[derive(Parser)]
#[command(name = "a3s-forward-proxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (uses the `[forward]` table)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides PROXY_BIND
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match cli.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(bind) = cli.bind {
        config.forward.bind = bind;
    }
    config.validate()?;

    let settings = config.forward;
    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(
        name = PROXY_NAME,
        addr = %listener.local_addr()?,
        allowlist = ?settings.allowlist,
        block_private_hosts = settings.block_private_hosts,
        "forwarding proxy listening"
    );

    forward::serve(listener, settings, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
        }
    })
    .await?;

    Ok(())
}
