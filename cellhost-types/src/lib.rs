//! Shared types for cellhost
//!
//! This crate provides the identifiers and wire types used by both the host
//! and its clients: application and attribute identifiers, cell addresses,
//! the `TxMsg` envelope, and the control payloads carried inside it.

mod attr_spec;
mod error;
mod tx;
mod wire;

pub use attr_spec::AttrSpec;
pub use error::TypeError;
pub use tx::{CellOp, CellOpKind, EncodedCellOp, MsgKind, TxMsg};
pub use wire::{DefEntry, Login, PinRequest, PinState, PinStatus, RegisterDefs};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Application / attribute identifier
///
/// Assigned when a descriptor is registered and stable for the life of the
/// process. `Uid::NIL` is never a valid registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl Uid {
    pub const NIL: Uid = Uid(0);

    /// Generate a fresh random UID
    pub fn generate() -> Self {
        loop {
            let (hi, _) = Uuid::new_v4().as_u64_pair();
            if hi != 0 {
                return Self(hi);
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Uid {
    fn from(id: u64) -> Self {
        Uid(id)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{:x}", self.0)
    }
}

/// A resolved attribute identifier
///
/// `id` is the symbol ID of the attribute's canonical spec within the scope
/// named by `native` (the process-wide native scope or one client's scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrUid {
    pub id: u32,
    pub native: bool,
}

impl AttrUid {
    pub fn native(id: u32) -> Self {
        Self { id, native: true }
    }

    pub fn client(id: u32) -> Self {
        Self { id, native: false }
    }
}

impl fmt::Display for AttrUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.native { "n" } else { "c" };
        write!(f, "attr:{}{}", scope, self.id)
    }
}

/// Cell address
///
/// Opaque to the host; owned and interpreted by the application instance
/// serving the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CellId(pub u64);

impl CellId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CellId {
    fn from(id: u64) -> Self {
        CellId(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell:{}", self.0)
    }
}
