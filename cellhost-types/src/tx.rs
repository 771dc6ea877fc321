//! The `TxMsg` envelope and its cell-op payload encoding

use crate::{CellId, TypeError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// What a `TxMsg` carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MsgKind {
    /// Client identity for the session (JSON `Login`)
    Login = 1,
    /// Symbol / attr / cell / selector definitions (JSON `RegisterDefs`)
    RegisterDefs = 2,
    /// Request to pin a cell (JSON `PinRequest`)
    PinRequest = 3,
    /// Close the pin named by the message's request ID
    Unpin = 4,
    /// A run of encoded cell ops
    #[default]
    CellOps = 5,
    /// Pin lifecycle notice (JSON `PinStatus`)
    PinStatus = 6,
    /// Session-level notice from the host
    SessionMeta = 7,
}

impl MsgKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MsgKind {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MsgKind::Login,
            2 => MsgKind::RegisterDefs,
            3 => MsgKind::PinRequest,
            4 => MsgKind::Unpin,
            5 => MsgKind::CellOps,
            6 => MsgKind::PinStatus,
            7 => MsgKind::SessionMeta,
            other => return Err(TypeError::UnknownMsgKind(other)),
        })
    }
}

/// Kind of mutation a `CellOp` applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellOpKind {
    UpsertAttr = 1,
    RemoveAttr = 2,
    /// Control signal for the cell as a whole (e.g. "synced"); carries no attr
    Meta = 3,
}

impl CellOpKind {
    /// Whether the op is addressed to a single attribute
    pub fn carries_attr(self) -> bool {
        !matches!(self, CellOpKind::Meta)
    }
}

impl TryFrom<u8> for CellOpKind {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => CellOpKind::UpsertAttr,
            2 => CellOpKind::RemoveAttr,
            3 => CellOpKind::Meta,
            other => return Err(TypeError::UnknownOpKind(other)),
        })
    }
}

/// A single mutation to a cell's state
///
/// `attr` is a native attribute ID; the pin marshaling the op translates it
/// to the client's ID space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellOp {
    pub kind: CellOpKind,
    pub cell: CellId,
    pub attr: u32,
}

impl CellOp {
    pub fn upsert(cell: CellId, attr: u32) -> Self {
        Self {
            kind: CellOpKind::UpsertAttr,
            cell,
            attr,
        }
    }

    pub fn remove(cell: CellId, attr: u32) -> Self {
        Self {
            kind: CellOpKind::RemoveAttr,
            cell,
            attr,
        }
    }

    pub fn meta(cell: CellId) -> Self {
        Self {
            kind: CellOpKind::Meta,
            cell,
            attr: 0,
        }
    }
}

/// A cell op as read back out of a `TxMsg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCellOp {
    pub kind: CellOpKind,
    pub cell: CellId,
    pub attr: u32,
    pub value: Vec<u8>,
}

const OP_HEADER_LEN: usize = 1 + 8 + 4 + 4;

/// Message envelope exchanged between host and client
///
/// `req_id == 0` addresses the session itself; any other value routes to
/// the request (pin) with that ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxMsg {
    pub req_id: u64,
    pub kind: MsgKind,
    pub data: Vec<u8>,
}

impl TxMsg {
    pub fn new(req_id: u64, kind: MsgKind) -> Self {
        Self {
            req_id,
            kind,
            data: Vec::new(),
        }
    }

    /// Build a message whose payload is `value` encoded as JSON
    pub fn json<T: Serialize>(req_id: u64, kind: MsgKind, value: &T) -> Result<Self, TypeError> {
        Ok(Self {
            req_id,
            kind,
            data: serde_json::to_vec(value)?,
        })
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, TypeError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    pub fn is_control(&self) -> bool {
        self.req_id == 0
    }

    /// Reset for reuse, keeping the allocation
    pub fn clear(&mut self) {
        self.req_id = 0;
        self.kind = MsgKind::default();
        self.data.clear();
    }

    /// Append one encoded op to the payload
    pub fn append_cell_op(&mut self, kind: CellOpKind, cell: CellId, attr: u32, value: &[u8]) {
        self.data.reserve(OP_HEADER_LEN + value.len());
        self.data.push(kind as u8);
        self.data.extend_from_slice(&cell.0.to_le_bytes());
        self.data.extend_from_slice(&attr.to_le_bytes());
        self.data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(value);
    }

    /// Decode every op in a `CellOps` payload
    pub fn cell_ops(&self) -> Result<Vec<EncodedCellOp>, TypeError> {
        let buf = &self.data;
        let mut ops = Vec::new();
        let mut at = 0;
        while at < buf.len() {
            if buf.len() - at < OP_HEADER_LEN {
                return Err(TypeError::Truncated { offset: at });
            }
            let kind = CellOpKind::try_from(buf[at])?;
            let cell = u64::from_le_bytes(read_array(buf, at + 1));
            let attr = u32::from_le_bytes(read_array(buf, at + 9));
            let len = u32::from_le_bytes(read_array(buf, at + 13)) as usize;
            let start = at + OP_HEADER_LEN;
            let end = start
                .checked_add(len)
                .filter(|end| *end <= buf.len())
                .ok_or(TypeError::Truncated { offset: start })?;
            ops.push(EncodedCellOp {
                kind,
                cell: CellId(cell),
                attr,
                value: buf[start..end].to_vec(),
            });
            at = end;
        }
        Ok(ops)
    }
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}
