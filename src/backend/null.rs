//! Backend with a real schema and no data storage.
//!
//! Deltas are applied and persisted like on any other backend, and sessions
//! keep a working transaction stack of placeholder scopes, but every data
//! capability reports `RealmError::Unsupported`.

use super::{BackendConfig, DataBackend, MetaBackend, SchemaCore};
use crate::core::{Batch, Entity, EntityId, LinkRecord, LinkRef, RealmError, Result};
use crate::delta::{DeltaRepo, DeltaSet, MemoryDeltaRepo};
use crate::schema::{QualName, Realm, RealmMeta};
use crate::session::pool::SessionPool;
use crate::session::{EntityStore, SessionConnection};
use crate::transaction::ScopeProvider;
use std::sync::{Arc, MutexGuard};

/// Connection whose transaction scopes are placeholders
#[derive(Debug, Default)]
pub struct NullConnection {
    closed: bool,
}

impl NullConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn unsupported<T>(capability: &'static str) -> Result<T> {
    Err(RealmError::Unsupported { capability })
}

impl ScopeProvider for NullConnection {
    type Scope = ();

    fn begin_scope(&mut self, _depth: usize) -> Result<()> {
        if self.closed {
            return Err(RealmError::Connection("connection is closed".into()));
        }
        Ok(())
    }

    fn commit_scope(&mut self, _scope: ()) -> Result<()> {
        Ok(())
    }

    fn rollback_scope(&mut self, _scope: ()) -> Result<()> {
        Ok(())
    }
}

impl EntityStore for NullConnection {
    fn load(&mut self, _id: &EntityId, _concept: Option<&QualName>) -> Result<Option<Entity>> {
        unsupported("load")
    }

    fn store_entity(&mut self, _entity: &Entity) -> Result<()> {
        unsupported("store_entity")
    }

    fn delete_entities(&mut self, _ids: &[EntityId]) -> Result<()> {
        unsupported("delete_entities")
    }

    fn store_links(
        &mut self,
        _source: &EntityId,
        _targets: &[EntityId],
        _link: &QualName,
        _merge: bool,
    ) -> Result<()> {
        unsupported("store_links")
    }

    fn delete_links(
        &mut self,
        _source: &EntityId,
        _targets: &[EntityId],
        _link: &QualName,
    ) -> Result<()> {
        unsupported("delete_links")
    }

    fn load_link(&mut self, _link: &LinkRef) -> Result<Vec<EntityId>> {
        unsupported("load_link")
    }

    fn start_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        unsupported("start_batch")
    }

    fn store_entity_batch(&mut self, _entities: &[Entity], _batch: &mut Batch) -> Result<()> {
        unsupported("store_entity_batch")
    }

    fn store_link_batch(&mut self, _links: &[LinkRecord], _batch: &mut Batch) -> Result<()> {
        unsupported("store_link_batch")
    }

    fn commit_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        unsupported("commit_batch")
    }

    fn close_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        unsupported("close_batch")
    }

    fn sync(&mut self) -> Result<()> {
        unsupported("sync")
    }
}

impl SessionConnection for NullConnection {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

pub struct NullBackend<R: DeltaRepo = MemoryDeltaRepo> {
    core: SchemaCore<R>,
    config: BackendConfig,
}

impl<R: DeltaRepo> NullBackend<R> {
    /// Create a backend with an empty schema over the repository `deltarepo`
    /// builds
    pub fn new<F>(deltarepo: F) -> Self
    where
        F: FnOnce() -> R,
    {
        let config = BackendConfig::default();
        Self {
            core: SchemaCore::new(deltarepo(), config.apply_mode, &config.head_ref),
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
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn deltarepo(&self) -> Result<MutexGuard<'_, R>> {
        self.core.repo()
    }
}

impl<R: DeltaRepo> MetaBackend for NullBackend<R> {
    fn apply_delta<D: Into<DeltaSet>>(&self, delta: D) -> Result<()> {
        self.core.apply_delta(delta.into())
    }

    fn getmeta(&self) -> Result<Arc<RealmMeta>> {
        self.core.getmeta()
    }
}

impl<R: DeltaRepo> DataBackend for NullBackend<R> {
    type Connection = NullConnection;

    fn realm(&self) -> Realm {
        Realm::new(&self.config.realm_name, self.core.meta_cell().clone())
    }

    fn get_session_pool(&self, realm: Realm) -> Result<SessionPool<NullConnection>> {
        SessionPool::new(realm, self.config.session.clone(), || {
            Ok(NullConnection::new())
        })
    }
}
