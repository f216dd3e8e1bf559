use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deploy_host::cli::HostOpts;
use deploy_host::DeployHost;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = HostOpts::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = opts.host_config().context("Failed to load configuration")?;
    let workspace = match &opts.workspace {
        Some(dir) => std::fs::canonicalize(dir)
            .with_context(|| format!("Failed to resolve workspace {}", dir.display()))?,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let host = DeployHost::new(config, workspace);
    host.start().await.context("Failed to start deploy host")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    host.stop().await.context("Failed to stop deploy host")?;
    Ok(())
}
