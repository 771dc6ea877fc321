//! cellhost: serves cells to clients over TCP.

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cellhost_daemon::cli::Cli::parse();
    cellhost_daemon::run_with_cli(cli).await
}
