//! In-memory entity and link storage
//!
//! The shared store is a pair of persistent maps behind one mutex. A
//! connection inside a transaction works on its own copy of those maps and
//! records which keys it touched; nested scopes are savepoints of that copy.
//! Committing the outermost scope writes only the touched keys back, so two
//! connections writing different entities never overwrite each other.

use crate::core::{Batch, Entity, EntityId, LinkRecord, LinkRef, RealmError, Result};
use crate::schema::{QualName, Realm};
use crate::session::{EntityStore, SessionConnection};
use crate::transaction::ScopeProvider;
use im::{OrdMap, OrdSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct StoreData {
    entities: OrdMap<EntityId, Entity>,
    links: OrdMap<LinkRef, Vec<EntityId>>,
}

/// Shared entity store, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<StoreData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection that checks concept filters against `realm`
    pub fn connect(&self, realm: Realm) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
            realm,
            working: None,
            closed: false,
        }
    }

    pub fn entity_count(&self) -> Result<usize> {
        Ok(self.data.lock()?.entities.len())
    }

    /// Number of (source, link) pairs with at least one target
    pub fn link_count(&self) -> Result<usize> {
        Ok(self.data.lock()?.links.len())
    }

    /// Committed state of one entity
    pub fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.data.lock()?.entities.get(id).cloned())
    }

    /// Committed targets of one link
    pub fn targets(&self, link: &LinkRef) -> Result<Vec<EntityId>> {
        Ok(self.data.lock()?.links.get(link).cloned().unwrap_or_default())
    }

    pub fn same_store(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Private copy of the store plus the keys written since it was taken
#[derive(Debug, Clone)]
struct Working {
    data: StoreData,
    dirty_entities: OrdSet<EntityId>,
    dirty_links: OrdSet<LinkRef>,
}

impl Working {
    fn new(data: StoreData) -> Self {
        Self {
            data,
            dirty_entities: OrdSet::new(),
            dirty_links: OrdSet::new(),
        }
    }

    fn put_entity(&mut self, entity: Entity) {
        self.dirty_entities.insert(entity.id);
        self.data.entities.insert(entity.id, entity);
    }

    /// Remove an entity together with its outgoing links and every
    /// reference to it from other links
    fn remove_entity(&mut self, id: &EntityId) {
        if self.data.entities.remove(id).is_some() {
            self.dirty_entities.insert(*id);
        }

        let touched: Vec<LinkRef> = self
            .data
            .links
            .iter()
            .filter(|(key, targets)| key.source == *id || targets.contains(id))
            .map(|(key, _)| key.clone())
            .collect();

        for key in touched {
            if key.source == *id {
                self.set_targets(key, Vec::new());
            } else if let Some(targets) = self.data.links.get(&key) {
                let remaining = targets.iter().filter(|t| *t != id).copied().collect();
                self.set_targets(key, remaining);
            }
        }
    }

    fn targets(&self, key: &LinkRef) -> Vec<EntityId> {
        self.data.links.get(key).cloned().unwrap_or_default()
    }

    fn set_targets(&mut self, key: LinkRef, targets: Vec<EntityId>) {
        self.dirty_links.insert(key.clone());
        if targets.is_empty() {
            self.data.links.remove(&key);
        } else {
            self.data.links.insert(key, targets);
        }
    }

    fn require_entity(&self, id: &EntityId) -> Result<()> {
        if self.data.entities.contains_key(id) {
            Ok(())
        } else {
            Err(RealmError::NotFound(format!("entity {}", id)))
        }
    }

    fn link_targets(
        &mut self,
        source: &EntityId,
        targets: &[EntityId],
        link: &QualName,
        merge: bool,
    ) -> Result<()> {
        self.require_entity(source)?;
        for target in targets {
            self.require_entity(target)?;
        }

        let key = LinkRef::new(*source, link.clone());
        let mut next = if merge { self.targets(&key) } else { Vec::new() };
        for target in targets {
            if !next.contains(target) {
                next.push(*target);
            }
        }
        self.set_targets(key, next);
        Ok(())
    }

    /// Copy every touched key into `shared`.
    ///
    /// The merged state replaces `shared` only if no link in it refers to a
    /// missing entity. Other connections may have removed an entity this
    /// one linked to, or linked to an entity this one removed.
    fn publish_into(self, shared: &mut StoreData) -> Result<()> {
        let mut next = shared.clone();
        for id in self.dirty_entities.iter() {
            match self.data.entities.get(id) {
                Some(entity) => {
                    next.entities.insert(*id, entity.clone());
                }
                None => {
                    next.entities.remove(id);
                }
            }
        }
        for key in self.dirty_links.iter() {
            match self.data.links.get(key) {
                Some(targets) => {
                    next.links.insert(key.clone(), targets.clone());
                }
                None => {
                    next.links.remove(key);
                }
            }
        }

        if let Some((key, missing)) = self.find_dangling(&next) {
            return Err(RealmError::ConstraintViolation(format!(
                "link {} of {} refers to missing entity {}",
                key.link, key.source, missing
            )));
        }
        *shared = next;
        Ok(())
    }

    fn find_dangling(&self, merged: &StoreData) -> Option<(LinkRef, EntityId)> {
        let missing = |id: &EntityId| !merged.entities.contains_key(id);

        for key in self.dirty_links.iter() {
            let Some(targets) = merged.links.get(key) else {
                continue;
            };
            if missing(&key.source) {
                return Some((key.clone(), key.source));
            }
            if let Some(target) = targets.iter().find(|t| missing(*t)) {
                return Some((key.clone(), *target));
            }
        }

        let removed: Vec<EntityId> = self
            .dirty_entities
            .iter()
            .filter(|id| missing(*id))
            .copied()
            .collect();
        if removed.is_empty() {
            return None;
        }
        merged.links.iter().find_map(|(key, targets)| {
            std::iter::once(&key.source)
                .chain(targets.iter())
                .find(|id| removed.contains(*id))
                .map(|id| (key.clone(), *id))
        })
    }
}

/// Open scope on a memory connection
pub struct MemoryScope {
    /// State to restore on rollback; `None` for the outermost scope
    savepoint: Option<Working>,
}

impl MemoryScope {
    pub fn is_outermost(&self) -> bool {
        self.savepoint.is_none()
    }
}

/// Session connection over a `MemoryStore`.
///
/// Outside a transaction every write is applied to the shared store
/// immediately.
pub struct MemoryConnection {
    store: MemoryStore,
    realm: Realm,
    working: Option<Working>,
    closed: bool,
}

impl MemoryConnection {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RealmError::Connection("connection is closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Run a write against the transaction copy, or against the shared
    /// store when no transaction is open
    fn write<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Working) -> Result<T>,
    {
        self.ensure_open()?;

        if let Some(working) = self.working.as_mut() {
            let before = working.clone();
            let result = op(&mut *working);
            if result.is_err() {
                *working = before;
            }
            return result;
        }

        let mut shared = self.store.data.lock()?;
        let mut working = Working::new(shared.clone());
        let value = op(&mut working)?;
        working.publish_into(&mut shared)?;
        Ok(value)
    }

    fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&StoreData) -> T,
    {
        self.ensure_open()?;

        match &self.working {
            Some(working) => Ok(op(&working.data)),
            None => {
                let shared = self.store.data.lock()?;
                Ok(op(&*shared))
            }
        }
    }
}

impl ScopeProvider for MemoryConnection {
    type Scope = MemoryScope;

    fn begin_scope(&mut self, depth: usize) -> Result<MemoryScope> {
        self.ensure_open()?;

        match &self.working {
            Some(working) => Ok(MemoryScope {
                savepoint: Some(working.clone()),
            }),
            None => {
                let snapshot = self.store.data.lock()?.clone();
                self.working = Some(Working::new(snapshot));
                debug!(depth, "memory transaction started");
                Ok(MemoryScope { savepoint: None })
            }
        }
    }

    fn commit_scope(&mut self, scope: MemoryScope) -> Result<()> {
        if !scope.is_outermost() {
            return Ok(());
        }

        let Some(working) = self.working.take() else {
            return Err(RealmError::InvalidState(
                "outermost scope committed without a working copy".to_string(),
            ));
        };
        let entities = working.dirty_entities.len();
        let links = working.dirty_links.len();

        // On failure the transaction's changes are discarded with `working`
        let mut shared = self.store.data.lock()?;
        working.publish_into(&mut shared)?;
        debug!(entities, links, "memory transaction committed");
        Ok(())
    }

    fn rollback_scope(&mut self, scope: MemoryScope) -> Result<()> {
        self.working = scope.savepoint;
        Ok(())
    }
}

impl EntityStore for MemoryConnection {
    fn load(&mut self, id: &EntityId, concept: Option<&QualName>) -> Result<Option<Entity>> {
        let found = self.read(|data| data.entities.get(id).cloned())?;
        match (found, concept) {
            (Some(entity), Some(wanted)) => {
                if self.realm.meta()?.is_subconcept(&entity.concept, wanted) {
                    Ok(Some(entity))
                } else {
                    Ok(None)
                }
            }
            (found, _) => Ok(found),
        }
    }

    fn store_entity(&mut self, entity: &Entity) -> Result<()> {
        let entity = entity.clone();
        self.write(|w| {
            w.put_entity(entity);
            Ok(())
        })
    }

    fn delete_entities(&mut self, ids: &[EntityId]) -> Result<()> {
        self.write(|w| {
            for id in ids {
                w.remove_entity(id);
            }
            Ok(())
        })
    }

    fn store_links(
        &mut self,
        source: &EntityId,
        targets: &[EntityId],
        link: &QualName,
        merge: bool,
    ) -> Result<()> {
        self.write(|w| w.link_targets(source, targets, link, merge))
    }

    /// Remove `targets` from the link; an empty slice removes all of them
    fn delete_links(
        &mut self,
        source: &EntityId,
        targets: &[EntityId],
        link: &QualName,
    ) -> Result<()> {
        let key = LinkRef::new(*source, link.clone());
        self.write(|w| {
            let remaining = if targets.is_empty() {
                Vec::new()
            } else {
                w.targets(&key)
                    .into_iter()
                    .filter(|t| !targets.contains(t))
                    .collect()
            };
            w.set_targets(key, remaining);
            Ok(())
        })
    }

    fn load_link(&mut self, link: &LinkRef) -> Result<Vec<EntityId>> {
        self.read(|data| data.links.get(link).cloned().unwrap_or_default())
    }

    fn start_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        self.ensure_open()
    }

    fn store_entity_batch(&mut self, entities: &[Entity], batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        batch.entities.extend_from_slice(entities);
        Ok(())
    }

    fn store_link_batch(&mut self, links: &[LinkRecord], batch: &mut Batch) -> Result<()> {
        self.ensure_open()?;
        batch.links.extend_from_slice(links);
        Ok(())
    }

    /// Write every buffered entity, then every buffered link, as one unit
    fn commit_batch(&mut self, batch: &mut Batch) -> Result<()> {
        let (entities, links) = batch.take_contents();
        let batch_id = batch.id();

        self.write(|w| {
            for entity in entities {
                w.put_entity(entity);
            }
            for record in &links {
                w.link_targets(
                    &record.source,
                    std::slice::from_ref(&record.target),
                    &record.link,
                    true,
                )?;
            }
            Ok(())
        })?;

        debug!(batch = %batch_id, "memory batch written");
        Ok(())
    }

    fn close_batch(&mut self, batch: &mut Batch) -> Result<()> {
        let (entities, links) = batch.take_contents();
        if !entities.is_empty() || !links.is_empty() {
            debug!(
                batch = %batch.id(),
                entities = entities.len(),
                links = links.len(),
                "discarding uncommitted batch contents"
            );
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.ensure_open()
    }
}

impl SessionConnection for MemoryConnection {
    fn close(&mut self) -> Result<()> {
        self.working = None;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MetaCell, RealmMeta};

    fn person() -> QualName {
        QualName::new("test", "Person").unwrap()
    }

    fn friends() -> QualName {
        QualName::new("test", "friends").unwrap()
    }

    fn connection(store: &MemoryStore) -> MemoryConnection {
        store.connect(Realm::new("test", MetaCell::new(RealmMeta::new(false))))
    }

    #[test]
    fn test_autocommit_outside_transaction() {
        let store = MemoryStore::new();
        let mut conn = connection(&store);

        let alice = Entity::new(person());
        conn.store_entity(&alice).unwrap();

        assert_eq!(store.get(&alice.id).unwrap(), Some(alice));
    }

    #[test]
    fn test_nested_rollback_restores_savepoint() {
        let store = MemoryStore::new();
        let mut conn = connection(&store);
        let alice = Entity::new(person());
        let bob = Entity::new(person());

        let outer = conn.begin_scope(0).unwrap();
        conn.store_entity(&alice).unwrap();

        let inner = conn.begin_scope(1).unwrap();
        conn.store_entity(&bob).unwrap();
        conn.rollback_scope(inner).unwrap();

        assert!(conn.load(&alice.id, None).unwrap().is_some());
        assert!(conn.load(&bob.id, None).unwrap().is_none());
        assert_eq!(store.entity_count().unwrap(), 0);

        conn.commit_scope(outer).unwrap();
        assert_eq!(store.entity_count().unwrap(), 1);
    }

    #[test]
    fn test_commit_publishes_only_touched_keys() {
        let store = MemoryStore::new();
        let mut first = connection(&store);
        let mut second = connection(&store);

        let alice = Entity::new(person());
        let bob = Entity::new(person());

        let scope_a = first.begin_scope(0).unwrap();
        let scope_b = second.begin_scope(0).unwrap();
        first.store_entity(&alice).unwrap();
        second.store_entity(&bob).unwrap();

        first.commit_scope(scope_a).unwrap();
        second.commit_scope(scope_b).unwrap();

        assert_eq!(store.entity_count().unwrap(), 2);
    }

    #[test]
    fn test_delete_cascades_links() {
        let store = MemoryStore::new();
        let mut conn = connection(&store);
        let alice = Entity::new(person());
        let bob = Entity::new(person());
        conn.store_entity(&alice).unwrap();
        conn.store_entity(&bob).unwrap();

        conn.store_links(&alice.id, &[bob.id], &friends(), false)
            .unwrap();
        conn.store_links(&bob.id, &[alice.id], &friends(), false)
            .unwrap();
        assert_eq!(store.link_count().unwrap(), 2);

        conn.delete_entities(&[bob.id]).unwrap();

        assert_eq!(store.link_count().unwrap(), 0);
        assert!(
            conn.load_link(&LinkRef::new(alice.id, friends()))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_store_links_requires_entities() {
        let store = MemoryStore::new();
        let mut conn = connection(&store);
        let alice = Entity::new(person());
        conn.store_entity(&alice).unwrap();

        let err = conn
            .store_links(&alice.id, &[EntityId::new()], &friends(), false)
            .unwrap_err();
        assert!(matches!(err, RealmError::NotFound(_)));
    }

    #[test]
    fn test_commit_rejects_link_to_entity_deleted_meanwhile() {
        let store = MemoryStore::new();
        let mut first = connection(&store);
        let mut second = connection(&store);
        let alice = Entity::new(person());
        let bob = Entity::new(person());
        first.store_entity(&alice).unwrap();
        first.store_entity(&bob).unwrap();

        let scope = first.begin_scope(0).unwrap();
        first
            .store_links(&alice.id, &[bob.id], &friends(), false)
            .unwrap();
        second.delete_entities(&[bob.id]).unwrap();

        let err = first.commit_scope(scope).unwrap_err();
        assert!(matches!(err, RealmError::ConstraintViolation(_)));
        assert_eq!(store.link_count().unwrap(), 0);
        assert!(store.get(&alice.id).unwrap().is_some());
        assert!(store.get(&bob.id).unwrap().is_none());
    }

    #[test]
    fn test_commit_rejects_delete_of_entity_linked_meanwhile() {
        let store = MemoryStore::new();
        let mut first = connection(&store);
        let mut second = connection(&store);
        let alice = Entity::new(person());
        let bob = Entity::new(person());
        first.store_entity(&alice).unwrap();
        first.store_entity(&bob).unwrap();

        let scope = first.begin_scope(0).unwrap();
        first.delete_entities(&[bob.id]).unwrap();
        second
            .store_links(&alice.id, &[bob.id], &friends(), false)
            .unwrap();

        let err = first.commit_scope(scope).unwrap_err();
        assert!(matches!(err, RealmError::ConstraintViolation(_)));
        assert!(store.get(&bob.id).unwrap().is_some());
        assert_eq!(
            store.targets(&LinkRef::new(alice.id, friends())).unwrap(),
            vec![bob.id]
        );
    }

    #[test]
    fn test_closed_connection_rejects_work() {
        let store = MemoryStore::new();
        let mut conn = connection(&store);
        conn.close().unwrap();

        assert!(conn.sync().is_err());
        assert!(conn.begin_scope(0).is_err());
    }
}
