use clap::Parser;

/// CLI for the cell host daemon
#[derive(Debug, Clone, Parser)]
#[command(name = "cellhost", about = "Multi-tenant cell host daemon")]
pub struct Cli {
    /// Listen address for client connections
    #[arg(long, env = "CELLHOST_LISTEN_ADDR", default_value = "127.0.0.1:7410")]
    pub listen_addr: String,

    /// Per-session queue depth for pin traffic
    #[arg(long, env = "CELLHOST_OUTLET_CAPACITY", default_value = "64")]
    pub outlet_capacity: usize,

    /// Per-session queue depth for control traffic
    #[arg(long, env = "CELLHOST_CONTROL_CAPACITY", default_value = "16")]
    pub control_capacity: usize,

    /// How long a pin may wait on a full queue before it is closed
    #[arg(long, env = "CELLHOST_PUSH_TIMEOUT_MS", default_value = "5000")]
    pub push_timeout_ms: u64,

    /// Tick interval of the built-in clock app
    #[arg(long, env = "CELLHOST_CLOCK_INTERVAL_MS", default_value = "1000")]
    pub clock_interval_ms: u64,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}
