use super::{BackendConfig, DataBackend, MetaBackend, SchemaCore};
use crate::core::{RealmError, Result};
use crate::delta::{DeltaRepo, DeltaSet, MemoryDeltaRepo};
use crate::schema::{Realm, RealmMeta};
use crate::session::pool::SessionPool;
use crate::storage::memory::{MemoryConnection, MemoryStore};
use std::sync::{Arc, MutexGuard};

/// Backend keeping entities and links in process memory.
///
/// The schema goes through the shared delta protocol, so pairing this
/// backend with a `FileDeltaRepo` gives a schema that survives restarts
/// while the data does not.
pub struct MemoryBackend<R: DeltaRepo = MemoryDeltaRepo> {
    core: SchemaCore<R>,
    store: MemoryStore,
    config: BackendConfig,
}

impl<R: DeltaRepo> MemoryBackend<R> {
    pub fn new<F>(deltarepo: F) -> Self
    where
        F: FnOnce() -> R,
    {
        let config = BackendConfig::default();
        Self {
            core: SchemaCore::new(deltarepo(), config.apply_mode, &config.head_ref),
            store: MemoryStore::new(),
            config,
        }
    }

    pub fn with_config<F>(deltarepo: F, config: BackendConfig) -> Result<Self>
    where
        F: FnOnce() -> R,
    {
        config.validate().map_err(RealmError::Config)?;
        Ok(Self {
            core: SchemaCore::new(deltarepo(), config.apply_mode, &config.head_ref),
            store: MemoryStore::new(),
            config,
        })
    }

    /// Build the schema from whatever history the repository already holds
    pub fn restore<F>(deltarepo: F, config: BackendConfig) -> Result<Self>
    where
        F: FnOnce() -> Result<R>,
    {
        config.validate().map_err(RealmError::Config)?;
        let core = SchemaCore::replay(deltarepo()?, config.apply_mode, &config.head_ref)?;
        Ok(Self {
            core,
            store: MemoryStore::new(),
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn deltarepo(&self) -> Result<MutexGuard<'_, R>> {
        self.core.repo()
    }
}

impl<R: DeltaRepo> MetaBackend for MemoryBackend<R> {
    fn apply_delta<D: Into<DeltaSet>>(&self, delta: D) -> Result<()> {
        self.core.apply_delta(delta.into())
    }

    fn getmeta(&self) -> Result<Arc<RealmMeta>> {
        self.core.getmeta()
    }
}

impl<R: DeltaRepo> DataBackend for MemoryBackend<R> {
    type Connection = MemoryConnection;

    fn realm(&self) -> Realm {
        Realm::new(&self.config.realm_name, self.core.meta_cell().clone())
    }

    fn get_session_pool(&self, realm: Realm) -> Result<SessionPool<MemoryConnection>> {
        let store = self.store.clone();
        let connection_realm = realm.clone();
        SessionPool::new(realm, self.config.session.clone(), move || {
            Ok(store.connect(connection_realm.clone()))
        })
    }
}
