//! Host configuration

use std::time::Duration;

/// Tunables shared by every session of a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Capacity of each session's data queue (pin traffic)
    pub outlet_capacity: usize,
    /// Capacity of each session's control queue (req_id 0)
    pub control_capacity: usize,
    /// How long a push may wait on a full queue before its pin is closed
    pub push_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            outlet_capacity: 64,
            control_capacity: 16,
            push_timeout: Duration::from_secs(5),
        }
    }
}

impl HostConfig {
    pub fn with_outlet_capacity(mut self, capacity: usize) -> Self {
        self.outlet_capacity = capacity.max(1);
        self
    }

    pub fn with_control_capacity(mut self, capacity: usize) -> Self {
        self.control_capacity = capacity.max(1);
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }
}
