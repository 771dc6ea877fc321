//! Host sessions
//!
//! One `HostSession` serves one connected client. It owns:
//! - the client's `SessionRegistry` (symbol space and ID translation)
//! - a scope under the host scope; app instances and pins live beneath it
//! - a reader task, the only caller of `Transport::recv_tx`
//! - an egress task, the only caller of `Transport::send_tx`
//!
//! Outbound traffic goes through two bounded queues. Control messages
//! (req_id 0) have their own queue which the egress task always drains
//! first; pin traffic shares the data queue and keeps its send order.

mod registry;

pub use registry::{init_session_registry, SessionRegistry};

use crate::app::{AppContext, RunningApp};
use crate::asset::AssetPublisher;
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::pin::{Outlet, PinContext, PinReq, PinReqParams};
use crate::registry::Registry;
use crate::scope::Scope;
use crate::transport::Transport;
use crate::types::SessionId;
use cellhost_types::{Login, MsgKind, PinRequest, PinState, PinStatus, RegisterDefs, TxMsg, Uid};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

struct SessionInner {
    id: SessionId,
    config: HostConfig,
    host_registry: Arc<Registry>,
    registry: Arc<SessionRegistry>,
    scope: Scope,
    transport: Arc<dyn Transport>,
    assets: Arc<dyn AssetPublisher>,
    login: RwLock<Login>,
    instances: Mutex<HashMap<Uid, Arc<OnceCell<RunningApp>>>>,
    pins: Mutex<HashMap<u64, PinContext>>,
    ctrl_tx: mpsc::Sender<TxMsg>,
    data_tx: mpsc::Sender<TxMsg>,
    closing: AtomicBool,
    /// Tells the egress task to drain and exit
    stop_egress: watch::Sender<bool>,
    done: watch::Sender<bool>,
    egress: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running session; clones share the session
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<SessionInner>,
}

impl HostSession {
    /// Create the session and start its reader and egress tasks
    pub(crate) fn start(
        parent: &Scope,
        host_registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        config: HostConfig,
        assets: Arc<dyn AssetPublisher>,
    ) -> Result<HostSession> {
        let id = SessionId::new();
        let registry = init_session_registry(&host_registry)?;
        let scope = parent.spawn_child(format!("session:{id}"))?;

        let (ctrl_tx, ctrl_rx) = mpsc::channel(config.control_capacity.max(1));
        let (data_tx, data_rx) = mpsc::channel(config.outlet_capacity.max(1));
        let (stop_egress, stop_rx) = watch::channel(false);

        let session = HostSession {
            inner: Arc::new(SessionInner {
                id,
                config,
                host_registry,
                registry,
                scope,
                transport,
                assets,
                login: RwLock::new(Login::default()),
                instances: Mutex::new(HashMap::new()),
                pins: Mutex::new(HashMap::new()),
                ctrl_tx,
                data_tx,
                closing: AtomicBool::new(false),
                stop_egress,
                done: watch::Sender::new(false),
                egress: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        };

        let egress = tokio::spawn(session.clone().run_egress(ctrl_rx, data_rx, stop_rx));
        *session.inner.egress.lock() = Some(egress);
        let reader = tokio::spawn(session.clone().run_reader());
        *session.inner.reader.lock() = Some(reader);

        info!(session = %id, transport = session.inner.transport.label(), "session started");
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn host_registry(&self) -> &Arc<Registry> {
        &self.inner.host_registry
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Identity the client presented with its last `Login`
    pub fn login_info(&self) -> Login {
        self.inner.login.read().clone()
    }

    pub fn asset_publisher(&self) -> Arc<dyn AssetPublisher> {
        self.inner.assets.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire) || !self.inner.scope.is_active()
    }

    pub fn open_pins(&self) -> usize {
        self.inner.pins.lock().len()
    }

    pub fn pin(&self, req_id: u64) -> Option<PinContext> {
        self.inner.pins.lock().get(&req_id).cloned()
    }

    /// Queue a message for the client
    ///
    /// `tx` is copied before this returns. Control messages (req_id 0) go
    /// ahead of queued pin traffic.
    pub async fn send_tx(&self, tx: &TxMsg) -> Result<()> {
        let queue = if tx.is_control() {
            &self.inner.ctrl_tx
        } else {
            &self.inner.data_tx
        };
        tokio::select! {
            biased;
            _ = self.inner.scope.closing() => Err(HostError::StreamClosed),
            sent = queue.send(tx.clone()) => sent.map_err(|_| HostError::StreamClosed),
        }
    }

    async fn send_status(&self, req_id: u64, status: PinStatus) -> Result<()> {
        let kind = if req_id == 0 {
            MsgKind::SessionMeta
        } else {
            MsgKind::PinStatus
        };
        self.send_tx(&TxMsg::json(req_id, kind, &status)?).await
    }

    /// Build the immutable parameters for a client's pin request
    pub fn new_pin_request(&self, req_id: u64, pin_req: PinRequest) -> Result<PinReqParams> {
        let invocation = pin_req.invocation.trim();
        let url = match (invocation.is_empty(), pin_req.app_uid) {
            (false, _) => Url::parse(invocation),
            (true, Some(uid)) => Url::parse(&uid.to_string()),
            (true, None) => {
                return Err(HostError::InvalidRequest(
                    "pin request names neither an invocation nor an app".to_string(),
                ))
            }
        }
        .map_err(|e| HostError::InvalidRequest(format!("bad invocation {invocation:?}: {e}")))?;

        Ok(PinReqParams {
            req_id,
            pin_cell: pin_req.pin_cell.unwrap_or_default(),
            log_label: format!("{}/req:{req_id} {url}", self.inner.id),
            outlet: Outlet::new(self.inner.data_tx.clone(), self.inner.config.push_timeout),
            url,
            pin_req,
        })
    }

    /// Open a pin and hand it to the app instance that serves it
    ///
    /// On any failure the pin goes straight from Opening to Closed and the
    /// session is unaffected.
    pub async fn pin_cell(&self, params: PinReqParams) -> Result<PinContext> {
        if self.is_closing() {
            return Err(HostError::AlreadyClosing);
        }
        let req_id = params.req_id;
        if req_id == 0 {
            return Err(HostError::InvalidRequest("req_id 0 is reserved for the session".to_string()));
        }
        if self.inner.pins.lock().contains_key(&req_id) {
            return Err(duplicate_request(req_id));
        }

        let pin = PinContext::open(params, &self.inner.scope, self.inner.registry.clone())?;
        let inserted = {
            let mut pins = self.inner.pins.lock();
            if pins.contains_key(&req_id) {
                false
            } else {
                pins.insert(req_id, pin.clone());
                true
            }
        };
        if !inserted {
            pin.close().await;
            return Err(duplicate_request(req_id));
        }

        if let Err(e) = self.bind_pin(&pin).await {
            self.forget_pin(&pin);
            pin.close().await;
            return Err(e);
        }

        tokio::spawn(self.clone().watch_pin(pin.clone()));
        debug!(session = %self.inner.id, pin = %pin.label(), "pin active");
        Ok(pin)
    }

    async fn bind_pin(&self, pin: &PinContext) -> Result<()> {
        let req = &pin.params().pin_req;
        let registry = &self.inner.host_registry;
        let app = match req.app_uid {
            Some(uid) => registry.get_app_by_uid(uid).map_err(|_| HostError::app_not_found(uid))?,
            None => registry
                .get_app_for_invocation(&req.invocation)
                .map_err(|_| HostError::AppNotFound(req.invocation.clone()))?,
        };

        let running = self.get_app_instance(app.uid, true).await?;
        pin.bind(&running)?;
        pin.mark_active();
        running.instance.pin_cell(pin.clone()).await
    }

    /// Drops the pin from the table once it closes and tells the client
    async fn watch_pin(self, pin: PinContext) {
        pin.closed().await;
        self.forget_pin(&pin);
        if !self.is_closing() {
            let status = PinStatus::new(PinState::Closed);
            if let Err(e) = self.send_status(pin.req_id(), status).await {
                debug!(pin = %pin.label(), error = %e, "could not report pin close");
            }
        }
        debug!(session = %self.inner.id, pin = %pin.label(), "pin closed");
    }

    fn forget_pin(&self, pin: &PinContext) {
        let mut pins = self.inner.pins.lock();
        let same = pins
            .get(&pin.req_id())
            .is_some_and(|p| p.scope().id() == pin.scope().id());
        if same {
            pins.remove(&pin.req_id());
        }
    }

    /// Close one pin by request ID
    pub async fn unpin(&self, req_id: u64) -> Result<()> {
        let pin = self
            .pin(req_id)
            .ok_or_else(|| HostError::not_found("pin", req_id))?;
        pin.close().await;
        Ok(())
    }

    /// The session's instance of an app, starting it if asked to
    ///
    /// Concurrent callers for the same app share one start: at most one
    /// instance is ever created per app per session.
    pub async fn get_app_instance(&self, uid: Uid, auto_create: bool) -> Result<RunningApp> {
        let cell = {
            let mut instances = self.inner.instances.lock();
            match instances.get(&uid) {
                Some(cell) => cell.clone(),
                None if auto_create => {
                    let cell = Arc::new(OnceCell::new());
                    instances.insert(uid, cell.clone());
                    cell
                }
                None => return Err(HostError::app_not_found(uid)),
            }
        };

        if !auto_create {
            return cell.get().cloned().ok_or_else(|| HostError::app_not_found(uid));
        }

        match cell.get_or_try_init(|| self.start_instance(uid)).await {
            Ok(running) => Ok(running.clone()),
            Err(e) => {
                let mut instances = self.inner.instances.lock();
                let failed = instances
                    .get(&uid)
                    .is_some_and(|c| Arc::ptr_eq(c, &cell) && c.get().is_none());
                if failed {
                    instances.remove(&uid);
                }
                Err(e)
            }
        }
    }

    async fn start_instance(&self, uid: Uid) -> Result<RunningApp> {
        if self.is_closing() {
            return Err(HostError::AlreadyClosing);
        }
        let app = self
            .inner
            .host_registry
            .get_app_by_uid(uid)
            .map_err(|_| HostError::app_not_found(uid))?;
        let scope = self.inner.scope.spawn_child(format!("app:{}", app.name))?;
        let ctx = AppContext::new(app.clone(), self.inner.id, scope.clone(), self.inner.registry.clone());

        match app.factory().new_instance(&ctx) {
            Ok(instance) => {
                info!(session = %self.inner.id, app = %uid, name = %app.name, "started app instance");
                Ok(RunningApp { ctx, instance })
            }
            Err(e) => {
                scope.close().await;
                Err(e)
            }
        }
    }

    /// Stop one app instance, closing every pin it serves
    ///
    /// An instance that is still starting is stopped once its start ends.
    pub async fn stop_app(&self, uid: Uid) -> Result<()> {
        let cell = self
            .inner
            .instances
            .lock()
            .remove(&uid)
            .ok_or_else(|| HostError::app_not_found(uid))?;
        let Some(running) = settle_instance(uid, &cell).await else {
            return Ok(());
        };
        running.ctx.scope().close().await;
        running.instance.on_stop().await;
        info!(session = %self.inner.id, app = %uid, "stopped app instance");
        Ok(())
    }

    /// Close the session
    ///
    /// Every pin and app instance is Closed before the transport is torn
    /// down. Concurrent callers all return once the session is closed.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            self.closed().await;
            return;
        }
        let id = self.inner.id;
        debug!(session = %id, "closing session");

        self.inner.scope.close().await;

        let cells: Vec<_> = self.inner.instances.lock().drain().collect();
        for (uid, cell) in cells {
            if let Some(app) = settle_instance(uid, &cell).await {
                app.instance.on_stop().await;
            }
        }
        self.inner.pins.lock().clear();

        self.inner.stop_egress.send_replace(true);
        let egress = self.inner.egress.lock().take();
        if let Some(handle) = egress {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.inner.config.push_timeout, handle).await.is_err() {
                warn!(session = %id, "egress did not drain in time");
                abort.abort();
            }
        }

        self.inner.transport.close().await;
        let reader = self.inner.reader.lock().take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        self.inner.done.send_replace(true);
        info!(session = %id, "session closed");
    }

    /// Resolves once the session is fully closed
    pub async fn closed(&self) {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|d| *d).await;
    }

    fn spawn_close(&self) {
        let session = self.clone();
        tokio::spawn(async move { session.close().await });
    }

    async fn run_egress(
        self,
        mut ctrl_rx: mpsc::Receiver<TxMsg>,
        mut data_rx: mpsc::Receiver<TxMsg>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            let msg = tokio::select! {
                biased;
                Some(msg) = ctrl_rx.recv() => msg,
                Some(msg) = data_rx.recv() => msg,
                _ = stop.wait_for(|s| *s) => break,
                else => break,
            };
            if let Err(e) = self.inner.transport.send_tx(&msg).await {
                if e.is_stream_closed() {
                    debug!(session = %self.inner.id, "transport closed under egress");
                } else {
                    warn!(session = %self.inner.id, error = %e, "transport send failed");
                }
                self.spawn_close();
                break;
            }
        }
    }

    async fn run_reader(self) {
        let id = self.inner.id;
        loop {
            let received = tokio::select! {
                biased;
                _ = self.inner.scope.closing() => break,
                received = self.inner.transport.recv_tx() => received,
            };
            match received {
                Ok(tx) => self.dispatch(tx).await,
                Err(e) if e.is_stream_closed() => {
                    info!(session = %id, "client closed the stream");
                    self.spawn_close();
                    break;
                }
                Err(e) => {
                    warn!(session = %id, error = %e, "transport receive failed");
                    self.spawn_close();
                    break;
                }
            }
        }
        debug!(session = %id, "reader stopped");
    }

    async fn dispatch(&self, tx: TxMsg) {
        let id = self.inner.id;
        match tx.kind {
            MsgKind::Login => match tx.decode_json::<Login>() {
                Ok(login) => {
                    info!(session = %id, user = %login.user, "client logged in");
                    *self.inner.login.write() = login;
                }
                Err(e) => self.report_control_error(HostError::from(e)).await,
            },
            MsgKind::RegisterDefs => {
                let result = tx
                    .decode_json::<RegisterDefs>()
                    .map_err(HostError::from)
                    .and_then(|defs| self.inner.registry.register_defs(&defs));
                if let Err(e) = result {
                    self.report_control_error(e).await;
                }
            }
            MsgKind::PinRequest => {
                let session = self.clone();
                tokio::spawn(async move { session.serve_pin_request(tx).await });
            }
            MsgKind::Unpin => {
                if let Some(pin) = self.pin(tx.req_id) {
                    tokio::spawn(async move { pin.close().await });
                } else {
                    debug!(session = %id, req_id = tx.req_id, "unpin for unknown request");
                }
            }
            other => {
                debug!(session = %id, kind = ?other, "ignoring message kind from client");
            }
        }
    }

    async fn serve_pin_request(self, tx: TxMsg) {
        let req_id = tx.req_id;
        let result = match tx.decode_json::<PinRequest>() {
            Ok(req) => match self.new_pin_request(req_id, req) {
                Ok(params) => self.pin_cell(params).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(HostError::from(e)),
        };

        let err = match result {
            Ok(_) => return,
            Err(HostError::AlreadyClosing) => return,
            Err(e) => e,
        };
        info!(session = %self.inner.id, req_id, error = %err, "pin request refused");
        let state = match err {
            HostError::PinDenied(_) => PinState::Denied,
            _ => PinState::Failed,
        };
        if let Err(e) = self.send_status(req_id, PinStatus::with_message(state, err.to_string())).await {
            debug!(session = %self.inner.id, req_id, error = %e, "could not report refused pin");
        }
    }

    async fn report_control_error(&self, err: HostError) {
        info!(session = %self.inner.id, error = %err, "control message rejected");
        let status = PinStatus::with_message(PinState::Failed, err.to_string());
        if let Err(e) = self.send_status(0, status).await {
            debug!(session = %self.inner.id, error = %e, "could not report control error");
        }
    }
}

/// The instance in `cell`, waiting out a start already in progress
///
/// None if no start succeeded. A cell that is still empty is left empty.
async fn settle_instance(uid: Uid, cell: &OnceCell<RunningApp>) -> Option<RunningApp> {
    cell.get_or_try_init(|| async move { Err::<RunningApp, _>(HostError::app_not_found(uid)) })
        .await
        .ok()
        .cloned()
}

fn duplicate_request(req_id: u64) -> HostError {
    HostError::InvalidRequest(format!("request {req_id} is already pinned"))
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.transport.label())
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}
