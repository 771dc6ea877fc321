//! TCP listener that turns each accepted connection into a host session

use crate::tcp::TcpTransport;
use async_trait::async_trait;
use cellhost_core::{Host, HostError, HostService, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct TcpHostService {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    stop: watch::Sender<bool>,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TcpHostService {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            local_addr: listener.local_addr()?,
            listener: Mutex::new(Some(listener)),
            stop: watch::Sender::new(false),
            accept_loop: Mutex::new(None),
        })
    }

    /// Bound address; differs from the requested one when port 0 was asked for
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(host: Arc<Host>, listener: TcpListener, mut stop: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.wait_for(|s| *s) => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not disable nagle");
        }
        match host.start_new_session(Arc::new(TcpTransport::new(stream))) {
            Ok(session) => info!(%peer, session = %session.id(), "accepted client"),
            Err(e) => warn!(%peer, error = %e, "could not start session"),
        }
    }
    debug!("accept loop stopped");
}

#[async_trait]
impl HostService for TcpHostService {
    fn label(&self) -> &str {
        "tcp"
    }

    async fn start_service(&self, host: Arc<Host>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| HostError::InvalidRequest("tcp service already started".to_string()))?;
        let handle = tokio::spawn(accept_loop(host, listener, self.stop.subscribe()));
        *self.accept_loop.lock() = Some(handle);
        info!(addr = %self.local_addr, "listening");
        Ok(())
    }

    async fn graceful_stop(&self) {
        self.stop.send_replace(true);
        let handle = self.accept_loop.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
