//! Per-session registry: client symbol space and native↔client translation
//!
//! Each session sees two ID spaces. Native IDs come from the process-wide
//! catalog and are what apps use; client IDs are whatever the client chose
//! in its `RegisterDefs` batches. The translation table between them only
//! ever grows through `register_defs`.

use crate::catalog::{AttrCatalog, AttrDef};
use crate::elem::{validate_elem_type, AttrElemVal};
use crate::error::{HostError, Result};
use crate::registry::Registry;
use crate::symbol::{LocalSymbolTable, SymbolTable};
use cellhost_types::{AttrSpec, AttrUid, DefEntry, RegisterDefs};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct SessionTables {
    native_to_client: HashMap<u32, u32>,
    client_to_native: HashMap<u32, u32>,
    elem_types: HashMap<String, Arc<dyn AttrElemVal>>,
}

/// A definition from a `RegisterDefs` batch, validated but not yet applied
struct StagedDef {
    client_id: u32,
    name: String,
    attr: Option<AttrSpec>,
}

pub struct SessionRegistry {
    native: Arc<AttrCatalog>,
    client: AttrCatalog,
    /// Guards translation and prototypes; every mutation path takes it for
    /// writing so resolve and definition ingestion never interleave.
    state: RwLock<SessionTables>,
}

/// Build a session's registry, seeded from the process registry
///
/// Sessions call this exactly once, at creation.
pub fn init_session_registry(registry: &Registry) -> Result<Arc<SessionRegistry>> {
    let session = SessionRegistry::new(registry.native_catalog().clone());
    registry.export_to(&session)?;
    Ok(Arc::new(session))
}

impl SessionRegistry {
    pub fn new(native: Arc<AttrCatalog>) -> Self {
        let symbols: Arc<dyn SymbolTable> = Arc::new(LocalSymbolTable::client());
        Self {
            native,
            client: AttrCatalog::new(symbols, false),
            state: RwLock::new(SessionTables::default()),
        }
    }

    pub fn client_symbols(&self) -> &Arc<dyn SymbolTable> {
        self.client.symbols()
    }

    pub fn native_symbols(&self) -> &Arc<dyn SymbolTable> {
        self.native.symbols()
    }

    fn catalog(&self, native: bool) -> &AttrCatalog {
        if native {
            &self.native
        } else {
            &self.client
        }
    }

    /// Client ID previously defined for a native ID, if any
    pub fn native_to_client_id(&self, native_id: u32) -> Option<u32> {
        self.state.read().native_to_client.get(&native_id).copied()
    }

    pub fn client_to_native_id(&self, client_id: u32) -> Option<u32> {
        self.state.read().client_to_native.get(&client_id).copied()
    }

    /// Resolve an attr spec, registering it in the chosen scope on first use
    ///
    /// A client-scope ID assigned here is provisional: if the client later
    /// defines the same spec under its own ID, `register_defs` moves the
    /// spec to that ID and this one keeps resolving to the spec.
    pub fn resolve_attr_spec(&self, spec: &str, native: bool) -> Result<AttrUid> {
        let parsed = AttrSpec::parse(spec)?;
        let _writer = self.state.write();
        Ok(self.catalog(native).resolve_parsed(&parsed))
    }

    pub fn attr_def(&self, id: u32, native: bool) -> Option<AttrDef> {
        self.catalog(native).def(id)
    }

    /// Fresh zero-valued element for an attr def
    pub fn new_attr_elem(&self, attr_def_id: u32, native: bool) -> Result<Box<dyn AttrElemVal>> {
        let def = self
            .catalog(native)
            .def(attr_def_id)
            .ok_or_else(|| HostError::not_found("attr def", attr_def_id))?;
        let state = self.state.read();
        let prototype = state
            .elem_types
            .get(&def.elem_type)
            .ok_or_else(|| HostError::UnknownElemType(def.elem_type.clone()))?;
        Ok(prototype.new_instance())
    }

    /// Add a session-local prototype
    pub fn register_elem_type(&self, prototype: Box<dyn AttrElemVal>) -> Result<()> {
        let name = validate_elem_type(prototype.elem_type())?;
        let mut state = self.state.write();
        if state.elem_types.contains_key(&name) {
            return Err(HostError::AlreadyRegistered {
                kind: "element type",
                name,
            });
        }
        state.elem_types.insert(name, Arc::from(prototype));
        Ok(())
    }

    pub(crate) fn install_exported(&self, prototype: Arc<dyn AttrElemVal>) {
        self.state
            .write()
            .elem_types
            .entry(prototype.elem_type().to_string())
            .or_insert(prototype);
    }

    pub fn elem_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().elem_types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Ingest a batch of client definitions
    ///
    /// The whole batch is checked before any of it is applied: a conflict
    /// anywhere rejects every entry and leaves prior state as it was.
    pub fn register_defs(&self, defs: &RegisterDefs) -> Result<()> {
        let mut state = self.state.write();
        let staged = self.stage(&state, defs)?;

        let symbols = self.client.symbols();
        for def in &staged {
            match symbols.id_of(&def.name) {
                Some(provisional) if provisional != def.client_id => {
                    debug!(name = %def.name, provisional, client_id = def.client_id, "client took over provisional id");
                    symbols.rebind(&def.name, def.client_id)?;
                }
                _ => symbols.bind(&def.name, def.client_id)?,
            }
            let native_id = match &def.attr {
                Some(spec) => {
                    self.client.install(def.client_id, def.name.clone(), spec);
                    self.native.resolve_parsed(spec).id
                }
                None => self.native.symbols().get_or_intern(&def.name),
            };
            state.native_to_client.insert(native_id, def.client_id);
            state.client_to_native.insert(def.client_id, native_id);
        }
        debug!(defs = staged.len(), "registered client defs");
        Ok(())
    }

    fn stage(&self, state: &SessionTables, defs: &RegisterDefs) -> Result<Vec<StagedDef>> {
        let mut staged: Vec<StagedDef> = Vec::new();
        let mut batch_ids: HashMap<u32, String> = HashMap::new();
        let mut batch_names: HashMap<String, u32> = HashMap::new();

        let plain = defs
            .symbols
            .iter()
            .chain(&defs.cells)
            .chain(&defs.selectors)
            .map(stage_plain);
        let attrs = defs.attrs.iter().map(stage_attr);

        for def in plain.chain(attrs) {
            let def = def?;
            self.check_client_binding(state, &def)?;

            if let Some(prev) = batch_ids.get(&def.client_id).filter(|n| **n != def.name) {
                return Err(conflict(def.client_id, prev, &def.name));
            }
            if let Some(prev) = batch_names.get(&def.name).filter(|id| **id != def.client_id) {
                return Err(HostError::ConflictingDefinition(format!(
                    "{:?} defined as both {} and {}",
                    def.name, prev, def.client_id
                )));
            }
            batch_ids.insert(def.client_id, def.name.clone());
            batch_names.insert(def.name.clone(), def.client_id);
            staged.push(def);
        }
        Ok(staged)
    }

    /// Rejects a def that disagrees with what this session already knows
    fn check_client_binding(&self, state: &SessionTables, def: &StagedDef) -> Result<()> {
        let symbols = self.client.symbols();
        if let Some(bound) = symbols.name_of(def.client_id) {
            if *bound != *def.name {
                return Err(conflict(def.client_id, &bound, &def.name));
            }
        }
        // Only a host-assigned ID the client never defined may be replaced
        if let Some(bound) = symbols.id_of(&def.name) {
            if bound != def.client_id && state.client_to_native.contains_key(&bound) {
                return Err(HostError::ConflictingDefinition(format!(
                    "{:?} is already client id {bound}, not {}",
                    def.name, def.client_id
                )));
            }
        }

        // A native ID that does not exist yet cannot be mapped anywhere
        let Some(native_id) = self.native.symbols().id_of(&def.name) else {
            return Ok(());
        };
        if let Some(client_id) = state.native_to_client.get(&native_id) {
            if *client_id != def.client_id {
                return Err(HostError::ConflictingDefinition(format!(
                    "native id {native_id} already maps to client id {client_id}"
                )));
            }
        }
        if let Some(mapped) = state.client_to_native.get(&def.client_id) {
            if *mapped != native_id {
                return Err(HostError::ConflictingDefinition(format!(
                    "client id {} already maps to native id {mapped}",
                    def.client_id
                )));
            }
        }
        Ok(())
    }
}

fn stage_plain(entry: &DefEntry) -> Result<StagedDef> {
    let name = entry.name.trim();
    validate_entry(entry.id, name)?;
    Ok(StagedDef {
        client_id: entry.id,
        name: name.to_string(),
        attr: None,
    })
}

fn stage_attr(entry: &DefEntry) -> Result<StagedDef> {
    validate_entry(entry.id, entry.name.trim())?;
    let spec = AttrSpec::parse(&entry.name)?;
    Ok(StagedDef {
        client_id: entry.id,
        name: spec.canonical(),
        attr: Some(spec),
    })
}

fn validate_entry(id: u32, name: &str) -> Result<()> {
    if id == 0 {
        return Err(HostError::InvalidRequest(format!("client id 0 is reserved ({name:?})")));
    }
    if name.is_empty() {
        return Err(HostError::InvalidRequest(format!("client id {id} has an empty name")));
    }
    Ok(())
}

fn conflict(client_id: u32, bound: &str, requested: &str) -> HostError {
    HostError::ConflictingDefinition(format!(
        "client id {client_id} is {bound:?}, cannot redefine as {requested:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elem::{BytesVal, TextVal};
    use proptest::prelude::*;
    use std::any::Any;

    #[derive(Debug, Default)]
    struct ImageVal(Vec<u8>);

    impl AttrElemVal for ImageVal {
        fn elem_type(&self) -> &str {
            "image"
        }

        fn new_instance(&self) -> Box<dyn AttrElemVal> {
            Box::new(ImageVal::default())
        }

        fn marshal_to(&self, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&self.0);
        }

        fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
            self.0 = data.to_vec();
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Prototype whose element-type name is chosen by the test
    #[derive(Debug)]
    struct NamedVal(&'static str);

    impl AttrElemVal for NamedVal {
        fn elem_type(&self) -> &str {
            self.0
        }

        fn new_instance(&self) -> Box<dyn AttrElemVal> {
            Box::new(NamedVal(self.0))
        }

        fn marshal_to(&self, _buf: &mut Vec<u8>) {}

        fn unmarshal(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn registry_with_text() -> Registry {
        let registry = Registry::new();
        registry.register_elem_type(Box::new(TextVal::default())).unwrap();
        registry
    }

    fn attr_defs(entries: &[(u32, &str)]) -> RegisterDefs {
        RegisterDefs {
            attrs: entries.iter().map(|(id, name)| DefEntry::new(*id, *name)).collect(),
            ..RegisterDefs::default()
        }
    }

    #[test]
    fn test_resolve_is_idempotent_per_scope() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let native = session.resolve_attr_spec("text:title", true).unwrap();
        let client = session.resolve_attr_spec("text:title", false).unwrap();

        assert_eq!(session.resolve_attr_spec("text : title", true).unwrap(), native);
        assert_eq!(session.resolve_attr_spec("text:title", false).unwrap(), client);
        assert!(native.native);
        assert!(!client.native);
        assert!(client.id >= crate::symbol::CLIENT_AUTO_ID_BASE);
    }

    #[test]
    fn test_no_translation_without_defs() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let native = session.resolve_attr_spec("text:title", true).unwrap();
        assert_eq!(session.native_to_client_id(native.id), None);
        assert_eq!(session.native_to_client_id(9999), None);
    }

    #[test]
    fn test_register_defs_builds_translation() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        session.register_defs(&attr_defs(&[(40, "text:title")])).unwrap();

        let native = session.resolve_attr_spec("text:title", true).unwrap();
        assert_eq!(session.native_to_client_id(native.id), Some(40));
        assert_eq!(session.client_to_native_id(40), Some(native.id));
        // The client's own ID is what client-scope resolution now returns
        assert_eq!(session.resolve_attr_spec("text:title", false).unwrap().id, 40);

        // Repeating the same batch is a no-op
        session.register_defs(&attr_defs(&[(40, "text:title")])).unwrap();
    }

    #[test]
    fn test_client_defines_spec_resolved_earlier() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let provisional = session.resolve_attr_spec("text:title", false).unwrap();
        assert!(provisional.id >= crate::symbol::CLIENT_AUTO_ID_BASE);

        session.register_defs(&attr_defs(&[(40, "text:title")])).unwrap();

        let native = session.resolve_attr_spec("text:title", true).unwrap();
        assert_eq!(session.native_to_client_id(native.id), Some(40));
        assert_eq!(session.client_to_native_id(40), Some(native.id));
        assert_eq!(session.resolve_attr_spec("text:title", false).unwrap().id, 40);
        assert_eq!(session.attr_def(40, false).unwrap().canonical, "text:title");

        // The provisional ID still names the same spec
        assert_eq!(
            session.client_symbols().name_of(provisional.id).as_deref(),
            Some("text:title")
        );
        assert!(session.new_attr_elem(provisional.id, false).is_ok());

        // Once the client owns the spec, a different ID is a real conflict
        let err = session.register_defs(&attr_defs(&[(41, "text:title")])).unwrap_err();
        assert!(matches!(err, HostError::ConflictingDefinition(_)));
    }

    #[test]
    fn test_conflicting_batch_keeps_prior_state() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        session.register_defs(&attr_defs(&[(40, "text:title")])).unwrap();

        let err = session
            .register_defs(&attr_defs(&[(41, "text:body"), (40, "text:subtitle")]))
            .unwrap_err();
        assert!(matches!(err, HostError::ConflictingDefinition(_)));

        // Nothing from the rejected batch was applied
        assert_eq!(session.client_to_native_id(41), None);
        assert_eq!(session.client_symbols().id_of("text:body"), None);
        assert_eq!(session.client_symbols().name_of(40).as_deref(), Some("text:title"));
    }

    #[test]
    fn test_conflict_within_one_batch() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let err = session
            .register_defs(&attr_defs(&[(5, "text:a"), (5, "text:b")]))
            .unwrap_err();
        assert!(matches!(err, HostError::ConflictingDefinition(_)));
        assert!(session.client_symbols().is_empty());
    }

    #[test]
    fn test_same_name_rebound_to_new_id_conflicts() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        session.register_defs(&attr_defs(&[(40, "text:title")])).unwrap();
        let err = session.register_defs(&attr_defs(&[(42, "text:title")])).unwrap_err();
        assert!(matches!(err, HostError::ConflictingDefinition(_)));
    }

    #[test]
    fn test_reserved_and_malformed_entries() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        assert!(matches!(
            session.register_defs(&attr_defs(&[(0, "text:title")])),
            Err(HostError::InvalidRequest(_))
        ));
        assert!(matches!(
            session.register_defs(&attr_defs(&[(3, "text:[bad")])),
            Err(HostError::Codec(_))
        ));
    }

    #[test]
    fn test_plain_symbol_lists() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let defs = RegisterDefs {
            symbols: vec![DefEntry::new(1, "room")],
            cells: vec![DefEntry::new(2, "chat.message")],
            selectors: vec![DefEntry::new(3, "latest")],
            ..RegisterDefs::default()
        };
        session.register_defs(&defs).unwrap();

        let native_room = session.native_symbols().id_of("room").unwrap();
        assert_eq!(session.native_to_client_id(native_room), Some(1));
        assert_eq!(session.client_to_native_id(3), session.native_symbols().id_of("latest"));
    }

    #[test]
    fn test_export_is_a_snapshot() {
        let registry = registry_with_text();
        let early = init_session_registry(&registry).unwrap();

        registry.register_elem_type(Box::new(ImageVal::default())).unwrap();
        let late = init_session_registry(&registry).unwrap();

        let text = early.resolve_attr_spec("text:caption", true).unwrap();
        assert!(early.new_attr_elem(text.id, true).is_ok());

        let image = early.resolve_attr_spec("image:photo", true).unwrap();
        assert!(matches!(
            early.new_attr_elem(image.id, true),
            Err(HostError::UnknownElemType(name)) if name == "image"
        ));

        let elem = late.new_attr_elem(image.id, true).unwrap();
        assert_eq!(elem.elem_type(), "image");
    }

    #[test]
    fn test_new_attr_elem_unknown_def() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        assert!(matches!(
            session.new_attr_elem(12345, false),
            Err(HostError::NotFound { .. })
        ));
    }

    #[test]
    fn test_session_local_elem_type() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        session.register_elem_type(Box::new(BytesVal::default())).unwrap();
        assert!(session.register_elem_type(Box::new(TextVal::default())).is_err());
        assert_eq!(session.elem_types(), vec!["bytes", "text"]);
    }

    #[test]
    fn test_session_elem_type_must_be_bare() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        assert!(matches!(
            session.register_elem_type(Box::new(NamedVal("[x]text:y"))),
            Err(HostError::InvalidRequest(_))
        ));
        assert!(session.register_elem_type(Box::new(NamedVal("te xt"))).is_err());
        assert_eq!(session.elem_types(), vec!["text"]);

        session.register_elem_type(Box::new(NamedVal("vec3"))).unwrap();
        let attr = session.resolve_attr_spec("vec3:pos", true).unwrap();
        assert_eq!(session.new_attr_elem(attr.id, true).unwrap().elem_type(), "vec3");
    }

    #[test]
    fn test_concurrent_resolve_agrees() {
        let session = init_session_registry(&registry_with_text()).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || session.resolve_attr_spec("text:shared", false).unwrap())
            })
            .collect();
        let uids: Vec<AttrUid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(uids.windows(2).all(|w| w[0] == w[1]));
    }

    proptest! {
        #[test]
        fn prop_unmapped_native_ids_have_no_client_id(ids in proptest::collection::vec(1u32..10_000, 1..20)) {
            let session = init_session_registry(&Registry::new()).unwrap();
            for id in ids {
                prop_assert_eq!(session.native_to_client_id(id), None);
            }
        }
    }
}
