//! Application descriptors and the application boundary
//!
//! The host never computes cell state itself. An `App` descriptor tells the
//! registry how to recognise requests for an application and how to start
//! an instance of it; the running `AppInstance` decides whether to accept
//! each pin and streams cell ops through the `PinContext` it is handed.

use crate::error::Result;
use crate::pin::PinContext;
use crate::scope::Scope;
use crate::session::SessionRegistry;
use crate::types::SessionId;
use async_trait::async_trait;
use cellhost_types::{AttrUid, Uid};
use std::fmt;
use std::sync::Arc;

/// A running application, scoped to one host session
#[async_trait]
pub trait AppInstance: Send + Sync {
    /// Accept or refuse a pin
    ///
    /// Return `HostError::PinDenied` to refuse. On success the instance
    /// typically spawns a task that streams ops via `pin.push_tx` until
    /// `pin.closing()` resolves.
    async fn pin_cell(&self, pin: PinContext) -> Result<()>;

    /// Called once the instance's scope, and every pin under it, is Closed
    async fn on_stop(&self) {}
}

/// Starts instances of an app
pub trait AppFactory: Send + Sync {
    fn new_instance(&self, ctx: &AppContext) -> Result<Arc<dyn AppInstance>>;
}

impl<F> AppFactory for F
where
    F: Fn(&AppContext) -> Result<Arc<dyn AppInstance>> + Send + Sync,
{
    fn new_instance(&self, ctx: &AppContext) -> Result<Arc<dyn AppInstance>> {
        self(ctx)
    }
}

/// A registered application descriptor
///
/// Immutable once registered; the registry hands out `Arc<App>`.
#[derive(Clone)]
pub struct App {
    pub uid: Uid,
    pub name: String,
    /// Invocation URI prefixes this app answers to, e.g. `app://chat`
    pub invocations: Vec<String>,
    /// Attr specs the app declares support for
    pub attrs: Vec<String>,
    factory: Arc<dyn AppFactory>,
}

impl App {
    pub fn new(uid: impl Into<Uid>, name: impl Into<String>, factory: impl AppFactory + 'static) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            invocations: Vec::new(),
            attrs: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Descriptor whose instances come from a closure
    pub fn from_fn<F>(uid: impl Into<Uid>, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&AppContext) -> Result<Arc<dyn AppInstance>> + Send + Sync + 'static,
    {
        Self::new(uid, name, factory)
    }

    pub fn with_invocation(mut self, invocation: impl Into<String>) -> Self {
        self.invocations.push(invocation.into());
        self
    }

    pub fn with_attr(mut self, spec: impl Into<String>) -> Self {
        self.attrs.push(spec.into());
        self
    }

    pub fn factory(&self) -> &Arc<dyn AppFactory> {
        &self.factory
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("invocations", &self.invocations)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

/// What an app instance sees of the session it runs in
#[derive(Clone)]
pub struct AppContext {
    app: Arc<App>,
    session: SessionId,
    scope: Scope,
    registry: Arc<SessionRegistry>,
}

impl AppContext {
    pub(crate) fn new(app: Arc<App>, session: SessionId, scope: Scope, registry: Arc<SessionRegistry>) -> Self {
        Self {
            app,
            session,
            scope,
            registry,
        }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The instance's scope; every pin it serves is a child of it
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resolve an attr spec in the native scope, registering it if new
    pub fn resolve_attr(&self, spec: &str) -> Result<AttrUid> {
        self.registry.resolve_attr_spec(spec, true)
    }
}

/// An app instance together with its context
#[derive(Clone)]
pub struct RunningApp {
    pub ctx: AppContext,
    pub instance: Arc<dyn AppInstance>,
}

impl fmt::Debug for RunningApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningApp")
            .field("app", &self.ctx.app.name)
            .field("session", &self.ctx.session)
            .finish_non_exhaustive()
    }
}
