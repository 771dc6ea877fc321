//! Symbol interning
//!
//! A symbol table maps names to small integer IDs. Tables are append-only:
//! once a name has an ID, the pair never changes.

use crate::error::{HostError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// First ID handed out by native (process-wide) tables
pub const NATIVE_AUTO_ID_BASE: u32 = 1;

/// First ID a client table auto-assigns
///
/// Clients choose IDs below this for their own definitions, so host-side
/// auto-assignment never collides with them.
pub const CLIENT_AUTO_ID_BASE: u32 = 0x8000_0000;

/// Bidirectional name ↔ ID interning
pub trait SymbolTable: Send + Sync {
    /// Returns the name's ID, assigning the next free one if it has none
    fn get_or_intern(&self, name: &str) -> u32;

    /// Binds a name to a caller-chosen ID
    ///
    /// Rebinding the same pair is a no-op; binding either side to a
    /// different partner fails with `ConflictingDefinition`.
    fn bind(&self, name: &str, id: u32) -> Result<()>;

    /// Moves a name to a new ID
    ///
    /// The name's previous ID keeps resolving to it through `name_of`.
    /// Fails with `ConflictingDefinition` if `id` already names something
    /// else.
    fn rebind(&self, name: &str, id: u32) -> Result<()>;

    fn id_of(&self, name: &str) -> Option<u32>;

    fn name_of(&self, id: u32) -> Option<Arc<str>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Tables {
    by_name: HashMap<Arc<str>, u32>,
    by_id: HashMap<u32, Arc<str>>,
    next_id: u32,
}

/// In-memory symbol table guarded by a reader/writer lock
#[derive(Debug)]
pub struct LocalSymbolTable {
    tables: RwLock<Tables>,
}

impl LocalSymbolTable {
    pub fn new(first_id: u32) -> Self {
        Self {
            tables: RwLock::new(Tables {
                by_name: HashMap::new(),
                by_id: HashMap::new(),
                next_id: first_id,
            }),
        }
    }

    pub fn native() -> Self {
        Self::new(NATIVE_AUTO_ID_BASE)
    }

    pub fn client() -> Self {
        Self::new(CLIENT_AUTO_ID_BASE)
    }
}

impl SymbolTable for LocalSymbolTable {
    fn get_or_intern(&self, name: &str) -> u32 {
        if let Some(id) = self.tables.read().by_name.get(name) {
            return *id;
        }

        let mut tables = self.tables.write();
        // Re-check: another writer may have interned it between the locks
        if let Some(id) = tables.by_name.get(name) {
            return *id;
        }
        let mut id = tables.next_id;
        while tables.by_id.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        tables.next_id = id.wrapping_add(1);

        let name: Arc<str> = Arc::from(name);
        tables.by_name.insert(name.clone(), id);
        tables.by_id.insert(id, name);
        id
    }

    fn bind(&self, name: &str, id: u32) -> Result<()> {
        let mut tables = self.tables.write();
        match (tables.by_name.get(name), tables.by_id.get(&id)) {
            (Some(existing), _) if *existing == id => return Ok(()),
            (Some(existing), _) => {
                return Err(HostError::ConflictingDefinition(format!(
                    "symbol {name:?} is already bound to {existing}"
                )))
            }
            (None, Some(other)) => {
                return Err(HostError::ConflictingDefinition(format!(
                    "id {id} is already bound to {other:?}"
                )))
            }
            (None, None) => {}
        }

        let name: Arc<str> = Arc::from(name);
        tables.by_name.insert(name.clone(), id);
        tables.by_id.insert(id, name);
        Ok(())
    }

    fn rebind(&self, name: &str, id: u32) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(other) = tables.by_id.get(&id) {
            if **other != *name {
                return Err(HostError::ConflictingDefinition(format!(
                    "id {id} is already bound to {other:?}"
                )));
            }
        }

        let name: Arc<str> = Arc::from(name);
        tables.by_name.insert(name.clone(), id);
        tables.by_id.insert(id, name);
        Ok(())
    }

    fn id_of(&self, name: &str) -> Option<u32> {
        self.tables.read().by_name.get(name).copied()
    }

    fn name_of(&self, id: u32) -> Option<Arc<str>> {
        self.tables.read().by_id.get(&id).cloned()
    }

    fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }
}
