// ============================================================================
// Backends
// ============================================================================
//
// A backend pairs schema management (apply deltas, expose the current
// RealmMeta) with data management (hand out session pools). Every backend
// shares the delta protocol through `SchemaCore` and supplies its own
// session connection type.
//
// ============================================================================

pub mod memory;
pub mod null;
pub mod schema_core;

pub use memory::MemoryBackend;
pub use null::{NullBackend, NullConnection};
pub use schema_core::SchemaCore;

use crate::core::Result;
use crate::delta::{DeltaSet, HEAD_REF};
use crate::schema::{Realm, RealmMeta};
use crate::session::config::SessionConfig;
use crate::session::pool::SessionPool;
use crate::session::SessionConnection;
use std::sync::Arc;

/// How `apply_delta` mutates the schema for a multi-delta set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Apply only the first delta of the set to the in-memory schema, while
    /// still persisting every delta and moving HEAD to the last one.
    #[default]
    Representative,
    /// Apply every delta of the set, in order.
    Sequential,
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub apply_mode: ApplyMode,

    /// Reference advanced by `apply_delta`
    pub head_ref: String,

    /// Name of the realm returned by `DataBackend::realm`
    pub realm_name: String,

    /// Settings for sessions created by this backend's pools
    pub session: SessionConfig,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self {
            apply_mode: ApplyMode::default(),
            head_ref: HEAD_REF.to_string(),
            realm_name: "default".to_string(),
            session: SessionConfig::default(),
        }
    }

    pub fn apply_mode(mut self, mode: ApplyMode) -> Self {
        self.apply_mode = mode;
        self
    }

    pub fn head_ref(mut self, name: &str) -> Self {
        self.head_ref = name.to_string();
        self
    }

    pub fn realm_name(mut self, name: &str) -> Self {
        self.realm_name = name.to_string();
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.head_ref.trim().is_empty() {
            return Err("head_ref must not be empty".to_string());
        }
        if self.realm_name.trim().is_empty() {
            return Err("realm_name must not be empty".to_string());
        }
        self.session.validate()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema half of the backend contract
pub trait MetaBackend {
    /// Apply a delta or a delta set, persist it and advance HEAD
    fn apply_delta<D: Into<DeltaSet>>(&self, delta: D) -> Result<()>;

    /// Current schema snapshot
    fn getmeta(&self) -> Result<Arc<RealmMeta>>;
}

/// Data half of the backend contract
pub trait DataBackend {
    type Connection: SessionConnection;

    /// Realm bound to this backend's schema
    fn realm(&self) -> Realm;

    fn get_session_pool(&self, realm: Realm) -> Result<SessionPool<Self::Connection>>;
}

/// A complete backend
pub trait Backend: MetaBackend + DataBackend {}

impl<T: MetaBackend + DataBackend> Backend for T {}
