//! In-process transport over bounded tokio channels

use super::Transport;
use crate::error::{HostError, Result};
use async_trait::async_trait;
use cellhost_types::TxMsg;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// One end of an in-process duplex channel
pub struct InProcTransport {
    label: String,
    tx: Mutex<Option<mpsc::Sender<TxMsg>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<TxMsg>>,
    closed: watch::Sender<bool>,
}

impl InProcTransport {
    /// Two connected ends, each buffering up to `capacity` messages
    pub fn pair(capacity: usize) -> (InProcTransport, InProcTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        (
            InProcTransport::new("inproc:host", a_tx, a_rx),
            InProcTransport::new("inproc:client", b_tx, b_rx),
        )
    }

    fn new(label: &str, tx: mpsc::Sender<TxMsg>, rx: mpsc::Receiver<TxMsg>) -> Self {
        Self {
            label: label.to_string(),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: watch::Sender::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for InProcTransport {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_tx(&self, tx: &TxMsg) -> Result<()> {
        let sender = self.tx.lock().clone().ok_or(HostError::StreamClosed)?;
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(HostError::StreamClosed),
            sent = sender.send(tx.clone()) => sent.map_err(|_| HostError::StreamClosed),
        }
    }

    async fn recv_tx(&self) -> Result<TxMsg> {
        let mut closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(HostError::StreamClosed),
            msg = rx.recv() => msg.ok_or(HostError::StreamClosed),
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        // Dropping our sender ends the peer's stream once it drains
        self.tx.lock().take();
    }
}
