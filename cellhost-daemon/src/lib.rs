//! Library entrypoint for the cellhost daemon so tests and other binaries
//! can run the server in-process.

pub mod cli;
pub mod clock;
pub mod config;
pub mod service;
pub mod tcp;

use std::sync::Arc;

use anyhow::Result;
use cellhost_core::Host;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::DaemonConfig, service::TcpHostService};

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Build a host with the built-in apps and start listening
pub async fn start(cfg: &DaemonConfig) -> Result<(Arc<Host>, Arc<TcpHostService>)> {
    let host = Host::new(cfg.host.clone())?;
    host.registry().register_app(clock::clock_app(cfg.clock_interval))?;

    let service = Arc::new(TcpHostService::bind(cfg.listen_addr).await?);
    host.attach_service(service.clone()).await?;
    Ok((host, service))
}

/// Run the daemon using CLI args (parsed by the caller) until ctrl-c.
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    init_tracing(cli.verbose)?;

    let cfg = DaemonConfig::from_cli(&cli)?;
    let (host, service) = start(&cfg).await?;
    info!(addr = %service.local_addr(), "cellhost ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    host.shutdown().await;
    Ok(())
}
