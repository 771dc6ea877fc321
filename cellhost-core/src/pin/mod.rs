//! Pin contexts
//!
//! A pin is one client's live subscription to one cell. Its lifecycle:
//!
//! ```text
//! Opening ──bind──► Active ──cancel──► Closing ──drained──► Closed
//!    │                                                        ▲
//!    └──────────────── resolution failure ────────────────────┘
//! ```
//!
//! Cancellation comes from a client unpin, the session closing, the owning
//! app instance stopping, or the outlet timing out. Marshals and pushes
//! already in flight when cancellation arrives finish before Closed.

mod outlet;

pub use outlet::Outlet;

use crate::app::{AppContext, RunningApp};
use crate::elem::AttrElemVal;
use crate::error::{HostError, Result};
use crate::scope::{Scope, ScopeState};
use crate::session::SessionRegistry;
use cellhost_types::{CellId, CellOp, MsgKind, PinRequest, TxMsg};
use outlet::OutletError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use url::Url;

/// Immutable description of one pin request
#[derive(Debug, Clone)]
pub struct PinReqParams {
    pub req_id: u64,
    pub pin_req: PinRequest,
    pub pin_cell: CellId,
    pub url: Url,
    pub log_label: String,
    pub outlet: Outlet,
}

/// Read access to a pin request
pub trait PinReq {
    fn params(&self) -> &PinReqParams;

    /// Non-empty path segments of the request URL
    fn url_path(&self) -> Vec<String> {
        self.params()
            .url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl PinReq for PinReqParams {
    fn params(&self) -> &PinReqParams {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPhase {
    Opening,
    Active,
    Closing,
    Closed,
}

struct PinInner {
    params: PinReqParams,
    scope: Scope,
    registry: Arc<SessionRegistry>,
    /// Native attr IDs the client asked for; None streams every attr the
    /// client has defined
    enabled: Option<HashSet<u32>>,
    app: OnceLock<AppContext>,
    active: AtomicBool,
}

/// A live pin; cloning shares the same pin
#[derive(Clone)]
pub struct PinContext {
    inner: Arc<PinInner>,
}

impl PinReq for PinContext {
    fn params(&self) -> &PinReqParams {
        &self.inner.params
    }
}

impl PinContext {
    /// Open a pin in the Opening phase under `parent`
    pub(crate) fn open(params: PinReqParams, parent: &Scope, registry: Arc<SessionRegistry>) -> Result<Self> {
        let enabled = enabled_attrs(&params.pin_req, &registry)?;
        let scope = parent.spawn_child(format!("pin:{}", params.req_id))?;
        Ok(Self {
            inner: Arc::new(PinInner {
                params,
                scope,
                registry,
                enabled,
                app: OnceLock::new(),
                active: AtomicBool::new(false),
            }),
        })
    }

    /// Attach the pin to the app instance that will serve it
    ///
    /// The pin's scope moves under the instance's scope, so stopping the
    /// instance cancels the pin.
    pub(crate) fn bind(&self, app: &RunningApp) -> Result<()> {
        self.inner.scope.reparent(app.ctx.scope())?;
        self.inner
            .app
            .set(app.ctx.clone())
            .map_err(|_| HostError::InvalidRequest(format!("{} is already bound", self.label())))
    }

    pub(crate) fn mark_active(&self) {
        self.inner.active.store(true, Ordering::Release);
    }

    pub fn req_id(&self) -> u64 {
        self.inner.params.req_id
    }

    pub fn cell(&self) -> CellId {
        self.inner.params.pin_cell
    }

    pub fn label(&self) -> &str {
        &self.inner.params.log_label
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// The instance serving this pin, once bound
    pub fn app(&self) -> Option<&AppContext> {
        self.inner.app.get()
    }

    pub fn state(&self) -> PinPhase {
        match self.inner.scope.state() {
            ScopeState::Active if self.inner.active.load(Ordering::Acquire) => PinPhase::Active,
            ScopeState::Active => PinPhase::Opening,
            ScopeState::Closing => PinPhase::Closing,
            ScopeState::Closed => PinPhase::Closed,
        }
    }

    /// A fresh `CellOps` message addressed to this pin's originator
    pub fn new_tx(&self) -> TxMsg {
        TxMsg::new(self.req_id(), MsgKind::CellOps)
    }

    /// Append `op` to `dst`, translated into the client's ID space
    ///
    /// Ops for attrs this pin does not stream, or that the client never
    /// defined, are dropped and `dst` is left untouched. Returns whether
    /// the op was appended.
    pub fn marshal_cell_op(&self, dst: &mut TxMsg, op: CellOp, val: Option<&dyn AttrElemVal>) -> bool {
        let Some(_busy) = self.enter_active() else {
            return false;
        };

        let attr = if op.kind.carries_attr() {
            match self.client_attr(op.attr) {
                Some(id) => id,
                None => return false,
            }
        } else {
            0
        };

        let mut value = Vec::new();
        if let Some(val) = val {
            val.marshal_to(&mut value);
        }
        dst.append_cell_op(op.kind, op.cell, attr, &value);
        true
    }

    fn client_attr(&self, native_id: u32) -> Option<u32> {
        if let Some(enabled) = &self.inner.enabled {
            if !enabled.contains(&native_id) {
                return None;
            }
        }
        self.inner.registry.native_to_client_id(native_id)
    }

    /// Send a message to the request originator
    ///
    /// `tx` is copied; the caller may reuse it as soon as this returns.
    /// Fails with `StreamClosed` once the pin is no longer Active. If the
    /// session's queue stays full past the push timeout the pin is closed.
    pub async fn push_tx(&self, tx: &TxMsg) -> Result<()> {
        let Some(busy) = self.enter_active() else {
            return Err(HostError::StreamClosed);
        };

        let mut msg = tx.clone();
        msg.req_id = self.req_id();
        match self.inner.params.outlet.push(msg).await {
            Ok(()) => Ok(()),
            Err(OutletError::Closed) => {
                debug!(pin = %self.label(), "outlet closed");
                Err(HostError::StreamClosed)
            }
            Err(OutletError::Timeout) => {
                warn!(
                    pin = %self.label(),
                    timeout_ms = self.inner.params.outlet.timeout().as_millis() as u64,
                    "outlet stayed full, closing pin"
                );
                drop(busy);
                let pin = self.clone();
                tokio::spawn(async move { pin.close().await });
                Err(HostError::StreamClosed)
            }
        }
    }

    fn enter_active(&self) -> Option<crate::scope::BusyGuard> {
        if !self.inner.active.load(Ordering::Acquire) {
            return None;
        }
        self.inner.scope.enter()
    }

    /// Resolves once the pin has begun closing
    pub async fn closing(&self) {
        self.inner.scope.closing().await;
    }

    pub async fn closed(&self) {
        self.inner.scope.closed().await;
    }

    /// Close the pin; returns once it is Closed
    pub async fn close(&self) {
        self.inner.scope.close().await;
    }
}

impl std::fmt::Debug for PinContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinContext")
            .field("req_id", &self.req_id())
            .field("label", &self.label())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Translate a request's client attr IDs to native ones
fn enabled_attrs(req: &PinRequest, registry: &SessionRegistry) -> Result<Option<HashSet<u32>>> {
    if req.attrs.is_empty() {
        return Ok(None);
    }
    req.attrs
        .iter()
        .map(|client_id| {
            registry
                .client_to_native_id(*client_id)
                .ok_or_else(|| HostError::InvalidRequest(format!("attr {client_id} was never defined")))
        })
        .collect::<Result<HashSet<u32>>>()
        .map(Some)
}
