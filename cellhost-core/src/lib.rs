//! Cellhost core - a multi-tenant host for live cell subscriptions
//!
//! Clients connect over a `Transport`, pin cells by invocation URI, and
//! receive a stream of attribute mutations from the application that owns
//! each cell.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Host                              │
//! │  Registry (apps, element types, native attr catalog)         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐  │
//! │  │      HostSession s1      │  │      HostSession s2      │  │
//! │  │  SessionRegistry         │  │  SessionRegistry         │  │
//! │  │  (client IDs ↔ native)   │  │                          │  │
//! │  │  ┌────────────────────┐  │  │          ...             │  │
//! │  │  │ app instance chat  │  │  │                          │  │
//! │  │  │  PinContext req 7  │  │  │                          │  │
//! │  │  │  PinContext req 9  │  │  │                          │  │
//! │  │  └────────────────────┘  │  │                          │  │
//! │  │  reader · egress tasks   │  │                          │  │
//! │  └──────────────────────────┘  └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Symbols and attrs
//!
//! Names are interned into small integer IDs. The process-wide native
//! catalog gives every attribute spec one native ID; each session keeps a
//! client symbol table plus a translation table filled by the client's
//! `RegisterDefs` messages. Apps work in native IDs and the pin translates
//! on the way out.
//!
//! ## Scopes
//!
//! Host, sessions, app instances and pins each own a node in one scope
//! tree. Closing a node closes its subtree first, and waits for in-flight
//! work, so a session's close returns only after every pin is Closed.
//!
//! # Example
//!
//! ```rust
//! use cellhost_core::{App, AppInstance, PinContext, Registry, Result};
//! use std::sync::Arc;
//!
//! struct Silent;
//!
//! #[async_trait::async_trait]
//! impl AppInstance for Silent {
//!     async fn pin_cell(&self, _pin: PinContext) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let registry = Registry::new();
//! let app = App::from_fn(7u64, "chat", |_| Ok(Arc::new(Silent) as Arc<dyn AppInstance>))
//!     .with_invocation("app://chat");
//! registry.register_app(app).unwrap();
//!
//! let found = registry.get_app_for_invocation("app://chat/room1").unwrap();
//! assert_eq!(found.name, "chat");
//! assert!(registry.get_app_for_invocation("app://video").is_err());
//! ```

// Modules
pub mod app;
pub mod asset;
pub mod catalog;
pub mod config;
pub mod elem;
pub mod error;
pub mod host;
pub mod pin;
pub mod registry;
pub mod scope;
pub mod session;
pub mod symbol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use app::{App, AppContext, AppFactory, AppInstance, RunningApp};
pub use asset::{AssetPublisher, NoAssetPublisher};
pub use catalog::{AttrCatalog, AttrDef};
pub use config::HostConfig;
pub use elem::{builtin_prototypes, AttrElemVal, BytesVal, I64Val, TextVal};
pub use error::{HostError, Result};
pub use host::{Host, HostService};
pub use pin::{Outlet, PinContext, PinPhase, PinReq, PinReqParams};
pub use registry::Registry;
pub use scope::{BusyGuard, Scope, ScopeState, ScopeTree};
pub use session::{init_session_registry, HostSession, SessionRegistry};
pub use symbol::{LocalSymbolTable, SymbolTable, CLIENT_AUTO_ID_BASE, NATIVE_AUTO_ID_BASE};
pub use transport::{InProcTransport, Transport};
pub use types::{ScopeId, SessionId};

pub use cellhost_types as wire;
