//! Host-internal identity types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cancellation scope identifier
///
/// Scopes form the host's cancellation tree: host → session → app
/// instance → pin. IDs are process-unique; the root scope of a tree is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

static SCOPE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ScopeId {
    pub fn new() -> Self {
        Self(SCOPE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    pub fn root() -> Self {
        Self(0)
    }

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// Host session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
