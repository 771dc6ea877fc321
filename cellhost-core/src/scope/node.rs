//! Scope node - one entry in the cancellation tree

use crate::types::ScopeId;
use std::sync::Arc;
use tokio::sync::Notify;

/// State of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// The scope accepts new work and children
    Active,
    /// Close requested; in-flight work is draining
    Closing,
    /// Terminal
    Closed,
}

/// A node in the scope arena
///
/// Nodes form a tree through parent/child IDs. When a node closes, all its
/// children close first.
#[derive(Debug)]
pub(crate) struct ScopeNode {
    label: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    state: ScopeState,
    /// Number of live `BusyGuard`s
    busy: usize,
    /// Woken on every state or busy change
    signal: Arc<Notify>,
}

impl ScopeNode {
    pub fn new(label: String, parent: Option<ScopeId>) -> Self {
        Self {
            label,
            parent,
            children: Vec::new(),
            state: ScopeState::Active,
            busy: 0,
            signal: Arc::new(Notify::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: ScopeId) {
        self.parent = Some(parent);
    }

    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    pub fn add_child(&mut self, child: ScopeId) {
        self.children.push(child);
    }

    pub fn remove_child(&mut self, child: ScopeId) {
        self.children.retain(|c| *c != child);
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ScopeState::Active
    }

    /// Returns true if this call moved the node out of Active
    pub fn mark_closing(&mut self) -> bool {
        if self.state == ScopeState::Active {
            self.state = ScopeState::Closing;
            self.signal.notify_waiters();
            true
        } else {
            false
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = ScopeState::Closed;
        self.signal.notify_waiters();
    }

    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn enter(&mut self) {
        self.busy += 1;
    }

    pub fn exit(&mut self) {
        self.busy = self.busy.saturating_sub(1);
        if self.busy == 0 {
            self.signal.notify_waiters();
        }
    }

    pub fn signal(&self) -> Arc<Notify> {
        self.signal.clone()
    }
}
