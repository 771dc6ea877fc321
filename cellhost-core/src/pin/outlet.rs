//! Bounded push channel from a pin to its session's egress task

use cellhost_types::TxMsg;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Why a push did not reach the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutletError {
    /// The queue stayed full for the whole push timeout
    Timeout,
    /// The egress side is gone
    Closed,
}

/// Sending half of a session's data queue
///
/// A full queue blocks the pusher for at most `timeout`.
#[derive(Debug, Clone)]
pub struct Outlet {
    tx: mpsc::Sender<TxMsg>,
    timeout: Duration,
}

impl Outlet {
    pub fn new(tx: mpsc::Sender<TxMsg>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn push(&self, msg: TxMsg) -> Result<(), OutletError> {
        match self.tx.send_timeout(msg, self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(OutletError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(OutletError::Closed),
        }
    }
}
