use thiserror::Error;

/// Errors raised while parsing specs or decoding wire payloads
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid attr spec {spec:?}: {reason}")]
    InvalidAttrSpec { spec: String, reason: &'static str },

    #[error("cell op frame truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("unknown message kind {0}")]
    UnknownMsgKind(u8),

    #[error("unknown cell op kind {0}")]
    UnknownOpKind(u8),

    #[error("payload decode failed: {0}")]
    Json(#[from] serde_json::Error),
}
