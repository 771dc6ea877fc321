//! Control payloads carried as JSON inside `TxMsg::data`

use crate::{CellId, Uid};
use serde::{Deserialize, Serialize};

/// A client request to pin a cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRequest {
    /// URI naming the app and the cell path, e.g. `app://chat/room1`
    pub invocation: String,
    /// Pins straight to this app instead of matching `invocation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_cell: Option<CellId>,
    /// Client attr IDs to stream; empty means every attr the client has defined
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<u32>,
}

/// One `(client id, text)` definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefEntry {
    pub id: u32,
    pub name: String,
}

impl DefEntry {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A batch of client definitions
///
/// `attrs` entries carry attr spec expressions; the other lists carry plain
/// symbol names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDefs {
    #[serde(default)]
    pub symbols: Vec<DefEntry>,
    #[serde(default)]
    pub attrs: Vec<DefEntry>,
    #[serde(default)]
    pub cells: Vec<DefEntry>,
    #[serde(default)]
    pub selectors: Vec<DefEntry>,
}

impl RegisterDefs {
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.attrs.is_empty()
            && self.cells.is_empty()
            && self.selectors.is_empty()
    }
}

/// Opaque session identity, as produced by whatever authenticated the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub user: String,
    #[serde(default)]
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for Login {
    fn default() -> Self {
        Self {
            user: "anonymous".to_string(),
            device: String::new(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    Active,
    Closed,
    Denied,
    Failed,
}

/// Pin lifecycle notice sent to the request originator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    pub state: PinState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PinStatus {
    pub fn new(state: PinState) -> Self {
        Self {
            state,
            message: None,
        }
    }

    pub fn with_message(state: PinState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
        }
    }
}
