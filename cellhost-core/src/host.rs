//! The host: process-wide root of registries, sessions and services

use crate::asset::{AssetPublisher, NoAssetPublisher};
use crate::config::HostConfig;
use crate::elem::builtin_prototypes;
use crate::error::Result;
use crate::registry::Registry;
use crate::scope::{Scope, ScopeTree};
use crate::session::HostSession;
use crate::transport::Transport;
use crate::types::SessionId;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Optional process-wide extension, e.g. a network listener
#[async_trait]
pub trait HostService: Send + Sync {
    fn label(&self) -> &str;

    /// Begin serving; called once when the service is attached
    async fn start_service(&self, host: Arc<Host>) -> Result<()>;

    /// Stop taking new work and wait for the service's own tasks to exit
    async fn graceful_stop(&self);
}

pub struct Host {
    registry: Arc<Registry>,
    config: HostConfig,
    scope: Scope,
    assets: Arc<dyn AssetPublisher>,
    sessions: Mutex<HashMap<SessionId, HostSession>>,
    services: Mutex<Vec<Arc<dyn HostService>>>,
}

impl Host {
    pub fn new(config: HostConfig) -> Result<Arc<Host>> {
        Self::with_asset_publisher(config, Arc::new(NoAssetPublisher))
    }

    /// Build a host whose sessions publish assets through `assets`
    pub fn with_asset_publisher(config: HostConfig, assets: Arc<dyn AssetPublisher>) -> Result<Arc<Host>> {
        let registry = Registry::new();
        for prototype in builtin_prototypes() {
            registry.register_elem_type(prototype)?;
        }
        Ok(Arc::new(Host {
            registry: Arc::new(registry),
            config,
            scope: ScopeTree::new_root("host"),
            assets,
            sessions: Mutex::new(HashMap::new()),
            services: Mutex::new(Vec::new()),
        }))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Start a session serving the client on the other end of `transport`
    pub fn start_new_session(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<HostSession> {
        let session = HostSession::start(
            &self.scope,
            self.registry.clone(),
            transport,
            self.config.clone(),
            self.assets.clone(),
        )?;
        let id = session.id();
        self.sessions.lock().insert(id, session.clone());

        let host = Arc::downgrade(self);
        let watched = session.clone();
        tokio::spawn(async move {
            watched.closed().await;
            if let Some(host) = host.upgrade() {
                host.sessions.lock().remove(&id);
            }
        });
        Ok(session)
    }

    pub fn session(&self, id: SessionId) -> Option<HostSession> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Start `service` and keep it for shutdown
    pub async fn attach_service(self: &Arc<Self>, service: Arc<dyn HostService>) -> Result<()> {
        service.start_service(self.clone()).await?;
        info!(service = service.label(), "attached host service");
        self.services.lock().push(service);
        Ok(())
    }

    /// Stop every service, then close every session, then the host scope
    pub async fn shutdown(&self) {
        let services: Vec<_> = self.services.lock().drain(..).collect();
        for service in services {
            debug!(service = service.label(), "stopping host service");
            service.graceful_stop().await;
        }

        let sessions: Vec<HostSession> = self.sessions.lock().values().cloned().collect();
        join_all(sessions.iter().map(|s| s.close())).await;
        self.sessions.lock().clear();

        self.scope.close().await;
        info!("host shut down");
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}
