use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cellhost_core::HostConfig;

use crate::cli::Cli;

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub host: HostConfig,
    pub clock_interval: Duration,
}

impl DaemonConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let listen_addr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {:?}", cli.listen_addr))?;

        if cli.outlet_capacity == 0 || cli.control_capacity == 0 {
            bail!("queue capacities must be at least 1");
        }
        if cli.push_timeout_ms == 0 {
            bail!("push timeout must be positive");
        }
        if cli.clock_interval_ms == 0 {
            bail!("clock interval must be positive");
        }

        let host = HostConfig::default()
            .with_outlet_capacity(cli.outlet_capacity)
            .with_control_capacity(cli.control_capacity)
            .with_push_timeout(Duration::from_millis(cli.push_timeout_ms));

        Ok(Self {
            listen_addr,
            host,
            clock_interval: Duration::from_millis(cli.clock_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cellhost").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_from_cli_carries_tunables() {
        let cli = parse(&[
            "--listen-addr",
            "0.0.0.0:9000",
            "--outlet-capacity",
            "8",
            "--push-timeout-ms",
            "250",
        ]);
        let cfg = DaemonConfig::from_cli(&cli).unwrap();
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.host.outlet_capacity, 8);
        assert_eq!(cfg.host.push_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_cli_rejects_bad_values() {
        assert!(DaemonConfig::from_cli(&parse(&["--listen-addr", "nowhere"])).is_err());
        assert!(DaemonConfig::from_cli(&parse(&["--outlet-capacity", "0"])).is_err());
        assert!(DaemonConfig::from_cli(&parse(&["--clock-interval-ms", "0"])).is_err());
    }
}
