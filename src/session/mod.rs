pub mod config;
pub mod pool;

use crate::core::{
    Batch, BatchState, Entity, EntityId, LinkRecord, LinkRef, RealmError, Result, SchemaError,
};
use crate::schema::{QualName, Realm, RealmMeta};
use crate::transaction::{ScopeProvider, TransactionStack};
use config::SessionConfig;
use lru::LruCache;
use pool::{PoolInner, SessionPool};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::num::NonZeroUsize;
use std::sync::Weak;
use tracing::{debug, warn};

/// Data capabilities a backend connection provides to a session.
///
/// Every method is required. A backend that cannot offer one returns
/// `RealmError::Unsupported` from it, which callers can tell apart from a
/// failure of a capability the backend does have.
pub trait EntityStore {
    /// Fetch an entity, optionally restricted to a concept
    fn load(&mut self, id: &EntityId, concept: Option<&QualName>) -> Result<Option<Entity>>;

    fn store_entity(&mut self, entity: &Entity) -> Result<()>;

    fn delete_entities(&mut self, ids: &[EntityId]) -> Result<()>;

    /// Attach `targets` to `source` under `link`. With `merge` the targets are
    /// added to the existing ones, otherwise they replace them.
    fn store_links(
        &mut self,
        source: &EntityId,
        targets: &[EntityId],
        link: &QualName,
        merge: bool,
    ) -> Result<()>;

    fn delete_links(&mut self, source: &EntityId, targets: &[EntityId], link: &QualName)
    -> Result<()>;

    /// Resolve the targets behind a lazily loaded link
    fn load_link(&mut self, link: &LinkRef) -> Result<Vec<EntityId>>;

    fn start_batch(&mut self, batch: &mut Batch) -> Result<()>;

    fn store_entity_batch(&mut self, entities: &[Entity], batch: &mut Batch) -> Result<()>;

    fn store_link_batch(&mut self, links: &[LinkRecord], batch: &mut Batch) -> Result<()>;

    fn commit_batch(&mut self, batch: &mut Batch) -> Result<()>;

    fn close_batch(&mut self, batch: &mut Batch) -> Result<()>;

    /// Flush anything the connection still buffers
    fn sync(&mut self) -> Result<()>;
}

/// Everything a backend connection must supply to back a session
pub trait SessionConnection: ScopeProvider + EntityStore {
    /// Release the underlying transport
    fn close(&mut self) -> Result<()>;
}

/// One client unit of work.
///
/// Owns its connection, a stack of nested transaction scopes on that
/// connection and an LRU cache of loaded entities. Not meant to be shared
/// between threads; give every concurrent unit of work its own session.
pub struct Session<C: SessionConnection> {
    id: u64,
    realm: Realm,
    pool: Weak<PoolInner<C>>,
    xact: TransactionStack<C>,
    cache: LruCache<EntityId, Entity>,
    config: SessionConfig,
}

impl<C: SessionConnection> Session<C> {
    pub(crate) fn new(
        id: u64,
        realm: Realm,
        pool: Weak<PoolInner<C>>,
        connection: C,
        config: SessionConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.entity_cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            id,
            realm,
            pool,
            xact: TransactionStack::new(connection),
            cache: LruCache::new(capacity),
            config,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The pool that created this session, if it is still alive
    pub fn pool(&self) -> Option<SessionPool<C>> {
        self.pool.upgrade().map(SessionPool::from_inner)
    }

    pub fn connection(&self) -> &C {
        self.xact.provider()
    }

    pub fn is_closed(&self) -> bool {
        self.xact.is_closed()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Number of open transaction scopes
    pub fn depth(&self) -> usize {
        self.xact.depth()
    }

    pub fn in_transaction(&self) -> bool {
        self.xact.in_transaction()
    }

    pub fn begin(&mut self) -> Result<()> {
        self.xact.begin()
    }

    /// Commit the innermost scope.
    ///
    /// Committing with no open scope is a caller bug: debug builds panic,
    /// release builds return `TransactionUnderflow`.
    pub fn commit(&mut self) -> Result<()> {
        let result = self.xact.commit();
        if result.is_err() {
            self.cache.clear();
        }
        result
    }

    /// Roll back the innermost scope, if any
    pub fn rollback(&mut self) -> Result<()> {
        if self.xact.depth() > 0 {
            self.cache.clear();
        }
        self.xact.rollback()
    }

    /// Roll back every open scope, innermost first
    pub fn rollback_all(&mut self) -> Result<()> {
        self.cache.clear();
        self.xact.rollback_all()
    }

    /// Run `op` inside a new scope: commit when it returns `Ok`, roll back
    /// when it returns `Err`.
    pub fn transaction<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin()?;
        let depth = self.depth();
        let generation = self.xact.generation_at(depth);

        match op(self) {
            Ok(value) if self.xact.generation_at(depth) == generation => {
                self.unwind_to(depth)?;
                self.commit()?;
                Ok(value)
            }
            Ok(_) => {
                // The scope at `depth`, if any, was opened by the body itself
                if let Err(rollback_err) = self.unwind_to(depth - 1) {
                    warn!(session = self.id, error = %rollback_err, "rollback of scopes left by transaction body failed");
                }
                Err(RealmError::InvalidState(
                    "transaction body closed its own scope".to_string(),
                ))
            }
            Err(err) => {
                if let Err(rollback_err) = self.unwind_to(depth - 1) {
                    warn!(session = self.id, error = %rollback_err, "rollback after failed transaction body failed");
                }
                Err(err)
            }
        }
    }

    /// Roll back scopes the body left open beyond `depth`
    fn unwind_to(&mut self, depth: usize) -> Result<()> {
        while self.depth() > depth {
            self.rollback()?;
        }
        Ok(())
    }

    // ========================================================================
    // Entities and links
    // ========================================================================

    pub fn load(&mut self, id: &EntityId, concept: Option<&QualName>) -> Result<Option<Entity>> {
        self.ensure_open()?;

        if let Some(cached) = self.cache.get(id) {
            match concept {
                None => return Ok(Some(cached.clone())),
                Some(wanted) => {
                    let meta = self.realm.meta()?;
                    if meta.is_subconcept(&cached.concept, wanted) {
                        return Ok(Some(cached.clone()));
                    }
                    return Ok(None);
                }
            }
        }

        let loaded = self.xact.provider_mut().load(id, concept)?;
        if let Some(entity) = &loaded {
            self.cache.put(entity.id, entity.clone());
        }
        Ok(loaded)
    }

    pub fn store_entity(&mut self, entity: &Entity) -> Result<()> {
        self.ensure_open()?;
        let meta = self.realm.meta()?;
        check_entity(&meta, entity)?;

        self.xact.provider_mut().store_entity(entity)?;
        self.cache.put(entity.id, entity.clone());
        Ok(())
    }

    pub fn delete_entities(&mut self, ids: &[EntityId]) -> Result<()> {
        self.ensure_open()?;

        self.xact.provider_mut().delete_entities(ids)?;
        for id in ids {
            self.cache.pop(id);
        }
        Ok(())
    }

    pub fn store_links(
        &mut self,
        source: &Entity,
        targets: &[EntityId],
        link: &QualName,
        merge: bool,
    ) -> Result<()> {
        self.ensure_open()?;

        let meta = self.realm.meta()?;
        check_link(&meta, &source.concept, link)?;
        if let Some(def) = meta.link(link) {
            if !def.cardinality.many_targets() {
                let mut distinct = if merge {
                    self.xact
                        .provider_mut()
                        .load_link(&LinkRef::new(source.id, link.clone()))?
                } else {
                    Vec::new()
                };
                for target in targets {
                    if !distinct.contains(target) {
                        distinct.push(*target);
                    }
                }
                if distinct.len() > 1 {
                    return Err(SchemaError::TooManyTargets {
                        link: link.to_string(),
                        count: distinct.len(),
                    }
                    .into());
                }
            }
        }

        self.xact
            .provider_mut()
            .store_links(&source.id, targets, link, merge)
    }

    pub fn delete_links(
        &mut self,
        source: &EntityId,
        targets: &[EntityId],
        link: &QualName,
    ) -> Result<()> {
        self.ensure_open()?;
        self.xact.provider_mut().delete_links(source, targets, link)
    }

    /// Resolve a lazily loaded link to its target ids
    pub fn load_link(&mut self, link: &LinkRef) -> Result<Vec<EntityId>> {
        self.ensure_open()?;
        self.xact.provider_mut().load_link(link)
    }

    /// Resolve a link and load every target entity
    pub fn load_link_targets(&mut self, link: &LinkRef) -> Result<Vec<Entity>> {
        let ids = self.load_link(link)?;
        let mut targets = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(entity) = self.load(id, None)? {
                targets.push(entity);
            }
        }
        Ok(targets)
    }

    // ========================================================================
    // Batches
    // ========================================================================

    pub fn start_batch(&mut self, batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        expect_batch_state(batch, BatchState::Pending)?;

        self.xact.provider_mut().start_batch(batch)?;
        batch.set_state(BatchState::Started);
        debug!(session = self.id, batch = %batch.id(), "batch started");
        Ok(())
    }

    pub fn store_entity_batch(&mut self, entities: &[Entity], batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        expect_batch_state(batch, BatchState::Started)?;

        let meta = self.realm.meta()?;
        for entity in entities {
            check_entity(&meta, entity)?;
        }
        self.xact.provider_mut().store_entity_batch(entities, batch)
    }

    pub fn store_link_batch(&mut self, links: &[LinkRecord], batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        expect_batch_state(batch, BatchState::Started)?;

        let meta = self.realm.meta()?;
        for record in links {
            let concept = self.batch_source_concept(&record.source, batch)?;
            check_link(&meta, &concept, &record.link)?;
        }
        self.check_batch_cardinality(&meta, batch.links().iter().chain(links))?;

        self.xact.provider_mut().store_link_batch(links, batch)
    }

    /// Concept of a link source, looked up among the batch's buffered
    /// entities before the store
    fn batch_source_concept(&mut self, source: &EntityId, batch: &Batch) -> Result<QualName> {
        if let Some(entity) = batch.entities().iter().rev().find(|e| e.id == *source) {
            return Ok(entity.concept.clone());
        }
        self.load(source, None)?
            .map(|entity| entity.concept)
            .ok_or_else(|| RealmError::NotFound(format!("entity {}", source)))
    }

    /// Batched links are merged into the stored ones on commit, so a
    /// single-target link counts its stored target too.
    fn check_batch_cardinality<'a, I>(&mut self, meta: &RealmMeta, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a LinkRecord>,
    {
        let mut pending: BTreeMap<LinkRef, Vec<EntityId>> = BTreeMap::new();

        for record in records {
            let single = meta
                .link(&record.link)
                .is_some_and(|def| !def.cardinality.many_targets());
            if !single {
                continue;
            }

            let targets = match pending.entry(LinkRef::new(record.source, record.link.clone())) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let stored = self.xact.provider_mut().load_link(entry.key())?;
                    entry.insert(stored)
                }
            };
            if !targets.contains(&record.target) {
                targets.push(record.target);
            }
            if targets.len() > 1 {
                return Err(SchemaError::TooManyTargets {
                    link: record.link.to_string(),
                    count: targets.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn commit_batch(&mut self, batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        expect_batch_state(batch, BatchState::Started)?;

        let entities: Vec<Entity> = batch.entities().to_vec();
        self.xact.provider_mut().commit_batch(batch)?;
        batch.set_state(BatchState::Committed);

        for entity in entities {
            self.cache.put(entity.id, entity);
        }
        debug!(session = self.id, batch = %batch.id(), "batch committed");
        Ok(())
    }

    pub fn close_batch(&mut self, batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        if batch.state() == BatchState::Closed {
            return Ok(());
        }

        self.xact.provider_mut().close_batch(batch)?;
        batch.set_state(BatchState::Closed);
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.xact.provider_mut().sync()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the session and release its connection.
    ///
    /// Open scopes are rolled back first; closing with scopes still open is
    /// reported as `OpenTransactionsOnClose` after cleanup has happened.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let depth = self.xact.depth();
        let rollback_result = self.rollback_all();
        self.xact.close();
        let close_result = self.xact.provider_mut().close();
        self.cache.clear();

        if let Some(pool) = self.pool.upgrade() {
            pool.session_closed();
        }
        debug!(session = self.id, "session closed");

        if depth > 0 {
            if let Err(err) = &rollback_result {
                warn!(session = self.id, error = %err, "rollback during close failed");
            }
            if let Err(err) = &close_result {
                warn!(session = self.id, error = %err, "connection close failed");
            }
            return Err(RealmError::OpenTransactionsOnClose { depth });
        }
        rollback_result.and(close_result)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(RealmError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl<C: SessionConnection> Drop for Session<C> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }

        let depth = self.xact.depth();
        if depth > 0 {
            warn!(session = self.id, depth, "session dropped with open transactions");
            if !self.config.rollback_on_drop {
                // Leave the scopes to the connection's own cleanup.
                self.xact.close();
                let _ = self.xact.provider_mut().close();
                if let Some(pool) = self.pool.upgrade() {
                    pool.session_closed();
                }
                return;
            }
        }
        let _ = self.close();
    }
}

fn check_entity(meta: &RealmMeta, entity: &Entity) -> Result<()> {
    let def = meta
        .concept(&entity.concept)
        .ok_or_else(|| SchemaError::ConceptNotFound(entity.concept.to_string()))?;
    if def.is_abstract {
        return Err(SchemaError::AbstractConcept(entity.concept.to_string()).into());
    }
    Ok(())
}

fn check_link(meta: &RealmMeta, source_concept: &QualName, link: &QualName) -> Result<()> {
    let def = meta
        .link(link)
        .ok_or_else(|| SchemaError::LinkNotFound(link.to_string()))?;
    if !meta.is_subconcept(source_concept, &def.source) {
        return Err(SchemaError::LinkNotApplicable {
            link: link.to_string(),
            concept: source_concept.to_string(),
        }
        .into());
    }
    Ok(())
}

fn expect_batch_state(batch: &Batch, expected: BatchState) -> Result<()> {
    if batch.state() == expected {
        Ok(())
    } else {
        Err(RealmError::InvalidState(format!(
            "batch {} is {:?}, expected {:?}",
            batch.id(),
            batch.state(),
            expected
        )))
    }
}
