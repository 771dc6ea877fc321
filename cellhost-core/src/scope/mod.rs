//! Cancellation scopes
//!
//! Every long-lived unit of work in the host (the host itself, each session,
//! each running app instance, each pin) owns a scope. Scopes live in one
//! arena per host and form a tree through parent/child IDs:
//!
//! ```text
//! host
//!  └── session:s1
//!       ├── app:chat
//!       │    ├── pin:7
//!       │    └── pin:9
//!       └── pin:12        (still Opening, not yet bound to an app)
//! ```
//!
//! Closing a scope first marks its whole subtree Closing, then finishes the
//! subtree bottom-up: each node waits for its in-flight work (`BusyGuard`s)
//! to drain, becomes Closed, and leaves the arena. `close()` returns only
//! after every descendant is Closed.

mod node;

pub use node::ScopeState;

use crate::error::{HostError, Result};
use crate::types::ScopeId;
use node::ScopeNode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Arena holding every live scope of one host
#[derive(Debug, Default)]
pub struct ScopeTree {
    nodes: Mutex<HashMap<ScopeId, ScopeNode>>,
}

impl ScopeTree {
    /// Create a tree and return its root scope
    pub fn new_root(label: impl Into<String>) -> Scope {
        let tree = Arc::new(ScopeTree::default());
        let id = ScopeId::root();
        tree.nodes.lock().insert(id, ScopeNode::new(label.into(), None));
        Scope { tree, id }
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `id` and its descendants Closing; returns them children-first
    fn begin_close(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut nodes = self.nodes.lock();
        let mut order = Vec::new();
        collect_post_order(&nodes, id, &mut order);
        for sid in &order {
            if let Some(node) = nodes.get_mut(sid) {
                node.mark_closing();
            }
        }
        order
    }

    /// Signal for `id` if it satisfies `pending`, None once it no longer does
    fn pending_signal(&self, id: ScopeId, pending: impl Fn(&ScopeNode) -> bool) -> Option<Arc<Notify>> {
        let nodes = self.nodes.lock();
        match nodes.get(&id) {
            Some(node) if pending(node) => Some(node.signal()),
            _ => None,
        }
    }

    /// Waits until `id` is gone or `pending` stops holding for it
    async fn wait_while(&self, id: ScopeId, pending: impl Fn(&ScopeNode) -> bool) {
        loop {
            let Some(signal) = self.pending_signal(id, &pending) else {
                return;
            };
            // Register before re-checking so a wakeup between the two can't be lost
            let notified = signal.notified();
            if self.pending_signal(id, &pending).is_none() {
                return;
            }
            notified.await;
        }
    }

    /// Moves a drained node to Closed and drops it from the arena
    fn finish(&self, id: ScopeId) {
        let mut nodes = self.nodes.lock();
        let Some(mut node) = nodes.remove(&id) else {
            return;
        };
        node.mark_closed();
        if let Some(parent) = node.parent().and_then(|p| nodes.get_mut(&p)) {
            parent.remove_child(id);
        }
        trace!(scope = %id, label = node.label(), "scope closed");
    }
}

fn collect_post_order(nodes: &HashMap<ScopeId, ScopeNode>, id: ScopeId, out: &mut Vec<ScopeId>) {
    let Some(node) = nodes.get(&id) else {
        return;
    };
    for child in node.children() {
        collect_post_order(nodes, *child, out);
    }
    out.push(id);
}

/// Handle to one scope in a `ScopeTree`
///
/// Cloning the handle does not create a new scope. Dropping it does not
/// close the scope; closing is always explicit.
#[derive(Debug, Clone)]
pub struct Scope {
    tree: Arc<ScopeTree>,
    id: ScopeId,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn tree(&self) -> &Arc<ScopeTree> {
        &self.tree
    }

    pub fn label(&self) -> Option<String> {
        self.tree.nodes.lock().get(&self.id).map(|n| n.label().to_string())
    }

    /// Current state; a scope that has left the arena is Closed
    pub fn state(&self) -> ScopeState {
        self.tree
            .nodes
            .lock()
            .get(&self.id)
            .map(|n| n.state())
            .unwrap_or(ScopeState::Closed)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ScopeState::Active
    }

    pub fn child_count(&self) -> usize {
        self.tree
            .nodes
            .lock()
            .get(&self.id)
            .map(|n| n.children().len())
            .unwrap_or(0)
    }

    /// Spawn a child scope; fails once this scope has begun closing
    pub fn spawn_child(&self, label: impl Into<String>) -> Result<Scope> {
        let mut nodes = self.tree.nodes.lock();
        let parent = nodes
            .get_mut(&self.id)
            .filter(|n| n.is_active())
            .ok_or(HostError::AlreadyClosing)?;

        let id = ScopeId::new();
        parent.add_child(id);
        nodes.insert(id, ScopeNode::new(label.into(), Some(self.id)));
        Ok(Scope {
            tree: self.tree.clone(),
            id,
        })
    }

    /// Move this scope under `new_parent`
    ///
    /// Both scopes must be Active and belong to the same tree.
    pub fn reparent(&self, new_parent: &Scope) -> Result<()> {
        if !Arc::ptr_eq(&self.tree, &new_parent.tree) {
            return Err(HostError::InvalidRequest(
                "cannot reparent across scope trees".to_string(),
            ));
        }
        if self.id == new_parent.id {
            return Err(HostError::InvalidRequest("scope cannot parent itself".to_string()));
        }

        let mut nodes = self.tree.nodes.lock();
        let active = |id: &ScopeId| nodes.get(id).map(|n| n.is_active()).unwrap_or(false);
        if !active(&self.id) || !active(&new_parent.id) {
            return Err(HostError::AlreadyClosing);
        }

        let old_parent = nodes.get(&self.id).and_then(|n| n.parent());
        if let Some(old) = old_parent.and_then(|p| nodes.get_mut(&p)) {
            old.remove_child(self.id);
        }
        if let Some(parent) = nodes.get_mut(&new_parent.id) {
            parent.add_child(self.id);
        }
        if let Some(node) = nodes.get_mut(&self.id) {
            node.set_parent(new_parent.id);
        }
        Ok(())
    }

    /// Register in-flight work; None unless the scope is Active
    ///
    /// A Closing scope does not reach Closed while any guard is alive.
    pub fn enter(&self) -> Option<BusyGuard> {
        let mut nodes = self.tree.nodes.lock();
        let node = nodes.get_mut(&self.id).filter(|n| n.is_active())?;
        node.enter();
        Some(BusyGuard {
            tree: self.tree.clone(),
            id: self.id,
        })
    }

    /// Resolves once this scope has left Active
    pub async fn closing(&self) {
        self.tree.wait_while(self.id, |n| n.is_active()).await;
    }

    /// Resolves once this scope is Closed
    pub async fn closed(&self) {
        self.tree.wait_while(self.id, |_| true).await;
    }

    /// Close this scope and all of its descendants
    ///
    /// Idempotent; concurrent callers all return once the subtree is Closed.
    pub async fn close(&self) {
        let order = self.tree.begin_close(self.id);
        for id in order {
            self.tree.wait_while(id, |n| n.busy() > 0).await;
            self.tree.finish(id);
        }
        // Another closer may still be finishing this node
        self.closed().await;
    }
}

/// Keeps a scope from reaching Closed while alive
#[derive(Debug)]
pub struct BusyGuard {
    tree: Arc<ScopeTree>,
    id: ScopeId,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Some(node) = self.tree.nodes.lock().get_mut(&self.id) {
            node.exit();
        }
    }
}
