//! Stream-socket transport
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! len:u32 | req_id:u64 | kind:u8 | data
//! ```
//!
//! `len` counts everything after itself.

use async_trait::async_trait;
use cellhost_core::{HostError, Result, Transport};
use cellhost_types::{MsgKind, TxMsg};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

const HEADER_LEN: usize = 8 + 1;

/// Largest frame body accepted from a peer
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Append the frame for `tx` to `buf`
pub fn encode_frame(tx: &TxMsg, buf: &mut Vec<u8>) -> Result<()> {
    let body_len = HEADER_LEN + tx.data.len();
    if body_len > MAX_FRAME_LEN {
        return Err(HostError::Transport(format!("frame of {body_len} bytes is too large")));
    }
    buf.reserve(4 + body_len);
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.extend_from_slice(&tx.req_id.to_be_bytes());
    buf.push(tx.kind.as_u8());
    buf.extend_from_slice(&tx.data);
    Ok(())
}

/// Decode a frame body (everything after `len`)
pub fn decode_frame(body: &[u8]) -> Result<TxMsg> {
    if body.len() < HEADER_LEN {
        return Err(HostError::Transport(format!("frame body of {} bytes is truncated", body.len())));
    }
    let mut req_id = [0u8; 8];
    req_id.copy_from_slice(&body[..8]);
    Ok(TxMsg {
        req_id: u64::from_be_bytes(req_id),
        kind: MsgKind::try_from(body[8])?,
        data: body[HEADER_LEN..].to_vec(),
    })
}

fn io_error(err: io::Error) -> HostError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => HostError::StreamClosed,
        _ => HostError::Transport(err.to_string()),
    }
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<TxMsg> {
    let len = reader.read_u32().await.map_err(io_error)? as usize;
    if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
        return Err(HostError::Transport(format!("bad frame length {len}")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_error)?;
    decode_frame(&body)
}

pub struct TcpTransport {
    label: String,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let label = stream
            .peer_addr()
            .map(|addr| format!("tcp:{addr}"))
            .unwrap_or_else(|_| "tcp:unknown".to_string());
        let (read, write) = stream.into_split();
        Self {
            label,
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(Some(write)),
            closed: watch::Sender::new(false),
        }
    }

    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| HostError::Transport(format!("connect {addr}: {e}")))?;
        stream.set_nodelay(true).map_err(io_error)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_tx(&self, tx: &TxMsg) -> Result<()> {
        let mut frame = Vec::new();
        encode_frame(tx, &mut frame)?;

        let mut closed = self.closed.subscribe();
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(HostError::StreamClosed)?;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(HostError::StreamClosed),
            written = stream.write_all(&frame) => written.map_err(io_error),
        }
    }

    async fn recv_tx(&self) -> Result<TxMsg> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(HostError::StreamClosed),
            frame = read_frame(&mut reader) => frame,
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut stream) = writer {
            let _ = stream.shutdown().await;
        }
    }
}
