//! Error types for the host

use cellhost_types::{TypeError, Uid};
use thiserror::Error;

/// Top-level host error
///
/// Registration conflicts and lookup misses are recoverable by the caller.
/// `StreamClosed` is the normal teardown signal and must not be reported as
/// a fault.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{kind} {name:?} is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("conflicting definition: {0}")]
    ConflictingDefinition(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("no app found for {0}")]
    AppNotFound(String),

    #[error("no element type registered for {0:?}")]
    UnknownElemType(String),

    #[error("pin denied: {0}")]
    PinDenied(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("invalid app: {0}")]
    InvalidApp(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session is already closing")]
    AlreadyClosing,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Codec(#[from] TypeError),
}

impl HostError {
    pub fn not_found(kind: &'static str, name: impl ToString) -> Self {
        HostError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn app_not_found(uid: Uid) -> Self {
        HostError::AppNotFound(uid.to_string())
    }

    /// Whether this is the normal end-of-stream signal
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, HostError::StreamClosed)
    }
}

/// Result type using HostError
pub type Result<T> = std::result::Result<T, HostError>;
