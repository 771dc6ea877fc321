//! Transport boundary
//!
//! A transport is a duplex channel of `TxMsg`s between the host and one
//! client. The host owns exactly one per session: the session's reader task
//! is the only caller of `recv_tx`, its egress task the only caller of
//! `send_tx`.

mod inproc;

pub use inproc::InProcTransport;

use crate::error::Result;
use async_trait::async_trait;
use cellhost_types::TxMsg;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label for logs, e.g. the peer address
    fn label(&self) -> &str;

    /// Send one message
    ///
    /// The message is fully consumed before this returns; callers may reuse
    /// `tx` immediately.
    async fn send_tx(&self, tx: &TxMsg) -> Result<()>;

    /// Wait for the next message
    ///
    /// End of stream is `HostError::StreamClosed`, never a generic fault.
    async fn recv_tx(&self) -> Result<TxMsg>;

    /// Close the channel; idempotent, and unblocks any pending `recv_tx`
    async fn close(&self);
}
