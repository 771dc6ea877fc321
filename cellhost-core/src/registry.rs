//! Process-wide registry of apps and element types
//!
//! One `Registry` is built per host and shared by every session. Reads
//! (app lookup, invocation matching, export) vastly outnumber writes
//! (app install), so state sits behind a single `parking_lot::RwLock`,
//! whose fair unlocking keeps a queued writer from being starved by a
//! steady stream of readers.

use crate::app::App;
use crate::catalog::AttrCatalog;
use crate::elem::{validate_elem_type, AttrElemVal};
use crate::error::{HostError, Result};
use crate::session::SessionRegistry;
use crate::symbol::{LocalSymbolTable, SymbolTable};
use cellhost_types::{AttrSpec, Uid};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
struct InvocationEntry {
    pattern: String,
    uid: Uid,
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    elem_types: HashMap<String, Arc<dyn AttrElemVal>>,
    apps: HashMap<Uid, Arc<App>>,
    invocations: Vec<InvocationEntry>,
    next_seq: u64,
}

pub struct Registry {
    native: Arc<AttrCatalog>,
    state: RwLock<RegistryState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let symbols: Arc<dyn SymbolTable> = Arc::new(LocalSymbolTable::native());
        Self {
            native: Arc::new(AttrCatalog::new(symbols, true)),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// The native attr catalog shared by every session
    pub fn native_catalog(&self) -> &Arc<AttrCatalog> {
        &self.native
    }

    pub fn native_symbols(&self) -> &Arc<dyn SymbolTable> {
        self.native.symbols()
    }

    /// Install an element-type prototype under its element-type name
    ///
    /// Fails with `AlreadyRegistered` if the name is taken; the existing
    /// prototype is left untouched.
    pub fn register_elem_type(&self, prototype: Box<dyn AttrElemVal>) -> Result<()> {
        let name = validate_elem_type(prototype.elem_type())?;
        let mut state = self.state.write();
        if state.elem_types.contains_key(&name) {
            return Err(HostError::AlreadyRegistered {
                kind: "element type",
                name,
            });
        }
        debug!(elem_type = %name, "registered element type");
        state.elem_types.insert(name, Arc::from(prototype));
        Ok(())
    }

    /// Copy every registered prototype into a session registry
    ///
    /// This is a snapshot: prototypes registered afterwards are not seen by
    /// `dst`.
    pub fn export_to(&self, dst: &SessionRegistry) -> Result<()> {
        let state = self.state.read();
        for prototype in state.elem_types.values() {
            dst.install_exported(prototype.clone());
        }
        Ok(())
    }

    /// Names of all registered element types, sorted
    pub fn elem_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().elem_types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Install an app and index its invocation patterns
    pub fn register_app(&self, app: App) -> Result<Arc<App>> {
        let patterns = validate_app(&app)?;

        // Declared attrs are resolved natively so their IDs exist before
        // the first instance starts.
        let specs = app
            .attrs
            .iter()
            .map(|spec| AttrSpec::parse(spec))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| HostError::InvalidApp(format!("{}: {e}", app.name)))?;

        let mut state = self.state.write();
        if state.apps.contains_key(&app.uid) {
            return Err(HostError::AlreadyRegistered {
                kind: "app",
                name: app.uid.to_string(),
            });
        }

        for spec in &specs {
            self.native.resolve_parsed(spec);
        }

        let app = Arc::new(app);
        for pattern in patterns {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.invocations.push(InvocationEntry {
                pattern,
                uid: app.uid,
                seq,
            });
        }
        state.apps.insert(app.uid, app.clone());
        info!(app = %app.uid, name = %app.name, "registered app");
        Ok(app)
    }

    pub fn get_app_by_uid(&self, uid: Uid) -> Result<Arc<App>> {
        self.state
            .read()
            .apps
            .get(&uid)
            .cloned()
            .ok_or_else(|| HostError::not_found("app", uid))
    }

    /// Select the app whose invocation pattern best matches `invocation`
    ///
    /// The longest matching pattern wins; among equally long patterns the
    /// earliest registration wins.
    pub fn get_app_for_invocation(&self, invocation: &str) -> Result<Arc<App>> {
        let invocation = invocation.trim();
        let state = self.state.read();
        let best = state
            .invocations
            .iter()
            .filter(|entry| invocation_matches(&entry.pattern, invocation))
            .min_by(|a, b| b.pattern.len().cmp(&a.pattern.len()).then(a.seq.cmp(&b.seq)));

        best.and_then(|entry| state.apps.get(&entry.uid).cloned())
            .ok_or_else(|| HostError::not_found("app for invocation", invocation))
    }

    pub fn app_count(&self) -> usize {
        self.state.read().apps.len()
    }
}

/// Returns the normalised invocation patterns of a well-formed app
fn validate_app(app: &App) -> Result<Vec<String>> {
    if app.uid.is_nil() {
        return Err(HostError::InvalidApp(format!("{}: nil uid", app.name)));
    }
    if app.name.trim().is_empty() {
        return Err(HostError::InvalidApp(format!("{}: empty name", app.uid)));
    }
    if app.invocations.is_empty() {
        return Err(HostError::InvalidApp(format!("{}: no invocation patterns", app.name)));
    }

    app.invocations
        .iter()
        .map(|raw| {
            let pattern = normalize_pattern(raw);
            let parsed = Url::parse(&pattern)
                .map_err(|e| HostError::InvalidApp(format!("{}: bad invocation {raw:?}: {e}", app.name)))?;
            let rest = &pattern[parsed.scheme().len() + 1..];
            if rest.trim_start_matches('/').is_empty() {
                return Err(HostError::InvalidApp(format!(
                    "{}: invocation {raw:?} names only a scheme",
                    app.name
                )));
            }
            Ok(pattern)
        })
        .collect()
}

fn normalize_pattern(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// A pattern matches the same string or any extension of it at a
/// path, query or fragment boundary.
fn invocation_matches(pattern: &str, invocation: &str) -> bool {
    match invocation.strip_prefix(pattern) {
        Some("") => true,
        Some(rest) => rest.starts_with(['/', '?', '#']),
        None => false,
    }
}
