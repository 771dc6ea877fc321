//! Attribute definition catalogs
//!
//! A catalog pairs a symbol table with the attribute definitions interned
//! in it. The process registry owns the native catalog; every session owns
//! a client catalog over its private symbol table.

use crate::error::Result;
use crate::symbol::SymbolTable;
use cellhost_types::{AttrSpec, AttrUid};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A resolved attribute definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDef {
    pub id: u32,
    pub canonical: String,
    pub elem_type: String,
}

pub struct AttrCatalog {
    native: bool,
    symbols: Arc<dyn SymbolTable>,
    defs: RwLock<HashMap<u32, AttrDef>>,
}

impl AttrCatalog {
    pub fn new(symbols: Arc<dyn SymbolTable>, native: bool) -> Self {
        Self {
            native,
            symbols,
            defs: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_native(&self) -> bool {
        self.native
    }

    pub fn symbols(&self) -> &Arc<dyn SymbolTable> {
        &self.symbols
    }

    /// Resolves a spec, registering it on first use
    ///
    /// Interning is get-or-insert and the def insert is keyed by the
    /// interned ID, so concurrent callers with the same canonical spec
    /// always observe the same `AttrUid`.
    pub fn resolve(&self, spec: &str) -> Result<AttrUid> {
        let parsed = AttrSpec::parse(spec)?;
        Ok(self.resolve_parsed(&parsed))
    }

    pub fn resolve_parsed(&self, spec: &AttrSpec) -> AttrUid {
        let canonical = spec.canonical();
        let id = self.symbols.get_or_intern(&canonical);
        self.install(id, canonical, spec);
        AttrUid { id, native: self.native }
    }

    /// Records a def for an ID already bound in this catalog's symbol table
    pub(crate) fn install(&self, id: u32, canonical: String, spec: &AttrSpec) {
        if self.defs.read().contains_key(&id) {
            return;
        }
        self.defs.write().entry(id).or_insert_with(|| AttrDef {
            id,
            canonical,
            elem_type: spec.elem_type.clone(),
        });
    }

    pub fn def(&self, id: u32) -> Option<AttrDef> {
        self.defs.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::LocalSymbolTable;
    use proptest::prelude::*;

    fn native_catalog() -> AttrCatalog {
        AttrCatalog::new(Arc::new(LocalSymbolTable::native()), true)
    }

    #[test]
    fn test_resolve_registers_def() {
        let catalog = native_catalog();
        let uid = catalog.resolve("text:title").unwrap();
        assert!(uid.native);

        let def = catalog.def(uid.id).unwrap();
        assert_eq!(def.canonical, "text:title");
        assert_eq!(def.elem_type, "text");
    }

    #[test]
    fn test_whitespace_variants_share_uid() {
        let catalog = native_catalog();
        let a = catalog.resolve("text : title").unwrap();
        let b = catalog.resolve("text:title").unwrap();
        assert_eq!(a, b);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_invalid_spec_is_not_registered() {
        let catalog = native_catalog();
        assert!(catalog.resolve("[oops").is_err());
        assert!(catalog.is_empty());
        assert!(catalog.symbols().is_empty());
    }

    proptest! {
        #[test]
        fn prop_resolve_idempotent(
            elem in "[a-z]{1,6}",
            name in proptest::option::of("[a-z0-9_]{1,6}"),
        ) {
            let spec = match &name {
                Some(n) => format!("{elem}:{n}"),
                None => elem.clone(),
            };
            let catalog = native_catalog();
            let first = catalog.resolve(&spec).unwrap();
            let second = catalog.resolve(&spec).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
