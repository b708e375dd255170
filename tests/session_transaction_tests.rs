use realmstore::backend::{DataBackend, MetaBackend, NullBackend};
use realmstore::core::{Batch, Entity, EntityId, LinkRecord, LinkRef};
use realmstore::delta::{Delta, DeltaCommand, MemoryDeltaRepo};
use realmstore::schema::{ConceptDef, MetaCell, QualName, Realm, RealmMeta};
use realmstore::session::{EntityStore, SessionConnection};
use realmstore::transaction::ScopeProvider;
use realmstore::{RealmError, Result, SessionConfig, SessionPool};
use std::sync::{Arc, Mutex};

// ============================================================================
// Recording connection
// ============================================================================

type Events = Arc<Mutex<Vec<String>>>;

struct RecordingConnection {
    events: Events,
    fail_rollback_at: Option<usize>,
}

impl ScopeProvider for RecordingConnection {
    type Scope = usize;

    fn begin_scope(&mut self, depth: usize) -> Result<usize> {
        self.events.lock().unwrap().push(format!("begin {}", depth));
        Ok(depth)
    }

    fn commit_scope(&mut self, depth: usize) -> Result<()> {
        self.events.lock().unwrap().push(format!("commit {}", depth));
        Ok(())
    }

    fn rollback_scope(&mut self, depth: usize) -> Result<()> {
        self.events.lock().unwrap().push(format!("rollback {}", depth));
        if self.fail_rollback_at == Some(depth) {
            return Err(RealmError::Connection(format!("rollback {} failed", depth)));
        }
        Ok(())
    }
}

impl EntityStore for RecordingConnection {
    fn load(&mut self, _id: &EntityId, _concept: Option<&QualName>) -> Result<Option<Entity>> {
        Ok(None)
    }

    fn store_entity(&mut self, entity: &Entity) -> Result<()> {
        self.events.lock().unwrap().push(format!("store {}", entity.concept));
        Ok(())
    }

    fn delete_entities(&mut self, _ids: &[EntityId]) -> Result<()> {
        Ok(())
    }

    fn store_links(
        &mut self,
        _source: &EntityId,
        _targets: &[EntityId],
        _link: &QualName,
        _merge: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn delete_links(
        &mut self,
        _source: &EntityId,
        _targets: &[EntityId],
        _link: &QualName,
    ) -> Result<()> {
        Ok(())
    }

    fn load_link(&mut self, _link: &LinkRef) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }

    fn start_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    fn store_entity_batch(&mut self, _entities: &[Entity], _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    fn store_link_batch(&mut self, _links: &[LinkRecord], _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    fn commit_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    fn close_batch(&mut self, _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SessionConnection for RecordingConnection {
    fn close(&mut self) -> Result<()> {
        self.events.lock().unwrap().push("close".to_string());
        Ok(())
    }
}

fn recording_pool(fail_rollback_at: Option<usize>) -> (SessionPool<RecordingConnection>, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let realm = Realm::new("test", MetaCell::new(RealmMeta::new(false)));
    let shared = Arc::clone(&events);
    let pool = SessionPool::new(realm, SessionConfig::default(), move || {
        Ok(RecordingConnection {
            events: Arc::clone(&shared),
            fail_rollback_at,
        })
    })
    .unwrap();
    (pool, events)
}

fn taken(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.lock().unwrap())
}

fn null_backend() -> NullBackend {
    NullBackend::new(MemoryDeltaRepo::new)
}

// ============================================================================
// Depth tracking
// ============================================================================

#[test]
fn test_nested_depth_sequence() {
    let backend = null_backend();
    let pool = backend.get_session_pool(backend.realm()).unwrap();
    let mut session = pool.create().unwrap();

    assert_eq!(session.depth(), 0);
    assert!(!session.in_transaction());

    session.begin().unwrap();
    assert_eq!(session.depth(), 1);
    assert!(session.in_transaction());

    session.begin().unwrap();
    assert_eq!(session.depth(), 2);

    session.commit().unwrap();
    assert_eq!(session.depth(), 1);
    assert!(session.in_transaction());

    session.rollback().unwrap();
    assert_eq!(session.depth(), 0);
    assert!(!session.in_transaction());

    session.close().unwrap();
}

#[test]
fn test_rollback_on_empty_stack_is_noop() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    session.rollback().unwrap();
    session.rollback_all().unwrap();

    assert_eq!(session.depth(), 0);
    assert!(taken(&events).is_empty());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "no open transaction"))]
fn test_commit_without_transaction() {
    let backend = null_backend();
    let pool = backend.get_session_pool(backend.realm()).unwrap();
    let mut session = pool.create().unwrap();

    let result = session.commit();
    assert!(matches!(result, Err(RealmError::TransactionUnderflow)));
    assert_eq!(session.depth(), 0);
}

#[test]
fn test_scopes_committed_innermost_first() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    session.begin().unwrap();
    session.begin().unwrap();
    session.commit().unwrap();
    session.commit().unwrap();

    assert_eq!(
        taken(&events),
        vec!["begin 0", "begin 1", "commit 1", "commit 0"]
    );
}

#[test]
fn test_rollback_all_innermost_first() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    for _ in 0..3 {
        session.begin().unwrap();
    }
    taken(&events);

    session.rollback_all().unwrap();

    assert_eq!(session.depth(), 0);
    assert!(!session.in_transaction());
    assert_eq!(taken(&events), vec!["rollback 2", "rollback 1", "rollback 0"]);
}

#[test]
fn test_rollback_all_continues_after_failure() {
    let (pool, events) = recording_pool(Some(1));
    let mut session = pool.create().unwrap();

    for _ in 0..3 {
        session.begin().unwrap();
    }
    taken(&events);

    let err = session.rollback_all().unwrap_err();

    assert!(matches!(err, RealmError::Connection(_)));
    assert_eq!(session.depth(), 0);
    assert_eq!(taken(&events), vec!["rollback 2", "rollback 1", "rollback 0"]);
}

// ============================================================================
// Closure transactions
// ============================================================================

#[test]
fn test_transaction_commits_on_ok() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    let value = session
        .transaction(|s| {
            assert_eq!(s.depth(), 1);
            Ok(42)
        })
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(session.depth(), 0);
    assert_eq!(taken(&events), vec!["begin 0", "commit 0"]);
}

#[test]
fn test_transaction_rolls_back_on_err() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();
    session.begin().unwrap();
    taken(&events);

    let result: Result<()> = session.transaction(|s| {
        s.begin()?;
        Err(RealmError::InvalidState("boom".to_string()))
    });

    assert!(matches!(result, Err(RealmError::InvalidState(_))));
    assert_eq!(session.depth(), 1);
    assert_eq!(
        taken(&events),
        vec!["begin 1", "begin 2", "rollback 2", "rollback 1"]
    );
}

#[test]
fn test_transaction_body_reopening_scope_rejected() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    let result = session.transaction(|s| {
        s.commit()?;
        s.begin()
    });

    assert!(matches!(result, Err(RealmError::InvalidState(_))));
    assert_eq!(session.depth(), 0);
    // The scope the body opened is rolled back, not committed
    assert_eq!(
        taken(&events),
        vec!["begin 0", "commit 0", "begin 0", "rollback 0"]
    );
}

#[test]
fn test_transaction_body_closing_scope_rejected() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    let result = session.transaction(|s| s.rollback());

    assert!(matches!(result, Err(RealmError::InvalidState(_))));
    assert_eq!(session.depth(), 0);
    assert_eq!(taken(&events), vec!["begin 0", "rollback 0"]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_close_with_open_transactions() {
    let (pool, events) = recording_pool(None);
    let mut session = pool.create().unwrap();

    session.begin().unwrap();
    session.begin().unwrap();
    taken(&events);

    let err = session.close().unwrap_err();

    assert!(matches!(err, RealmError::OpenTransactionsOnClose { depth: 2 }));
    assert!(session.is_closed());
    assert_eq!(session.depth(), 0);
    assert_eq!(taken(&events), vec!["rollback 1", "rollback 0", "close"]);

    // Second close is a no-op
    session.close().unwrap();
    assert!(taken(&events).is_empty());
}

#[test]
fn test_close_reports_open_transactions_over_rollback_failure() {
    let (pool, events) = recording_pool(Some(0));
    let mut session = pool.create().unwrap();

    session.begin().unwrap();
    session.begin().unwrap();
    taken(&events);

    let err = session.close().unwrap_err();

    assert!(matches!(err, RealmError::OpenTransactionsOnClose { depth: 2 }));
    assert!(session.is_closed());
    assert_eq!(taken(&events), vec!["rollback 1", "rollback 0", "close"]);
    assert_eq!(pool.stats().sessions_open, 0);
}

#[test]
fn test_closed_session_rejects_work() {
    let backend = null_backend();
    let pool = backend.get_session_pool(backend.realm()).unwrap();
    let mut session = pool.create().unwrap();
    session.close().unwrap();

    assert!(matches!(session.begin(), Err(RealmError::SessionClosed)));
    assert!(matches!(session.sync(), Err(RealmError::SessionClosed)));
}

#[test]
fn test_drop_rolls_back_open_scopes() {
    let (pool, events) = recording_pool(None);
    {
        let mut session = pool.create().unwrap();
        session.begin().unwrap();
        taken(&events);
    }

    assert_eq!(taken(&events), vec!["rollback 0", "close"]);
    assert_eq!(pool.stats().sessions_open, 0);
}

#[test]
fn test_drop_without_rollback_only_closes() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let realm = Realm::new("test", MetaCell::new(RealmMeta::new(false)));
    let shared = Arc::clone(&events);
    let pool = SessionPool::new(
        realm,
        SessionConfig::new().rollback_on_drop(false),
        move || {
            Ok(RecordingConnection {
                events: Arc::clone(&shared),
                fail_rollback_at: None,
            })
        },
    )
    .unwrap();

    {
        let mut session = pool.create().unwrap();
        session.begin().unwrap();
        taken(&events);
    }

    assert_eq!(taken(&events), vec!["close"]);
}

// ============================================================================
// Null backend capabilities
// ============================================================================

#[test]
fn test_null_backend_reports_unsupported() {
    let backend = null_backend();
    let person = QualName::parse("crm.Person").unwrap();
    backend
        .apply_delta(Delta::with_id(
            "init",
            vec![
                DeltaCommand::CreateModule { name: "crm".into() },
                DeltaCommand::CreateConcept(ConceptDef::new(person.clone())),
            ],
        ))
        .unwrap();

    let pool = backend.get_session_pool(backend.realm()).unwrap();
    let mut session = pool.create().unwrap();

    assert!(session.sync().unwrap_err().is_unsupported());
    assert!(session.load(&EntityId::new(), None).unwrap_err().is_unsupported());
    assert!(
        session
            .store_entity(&Entity::new(person))
            .unwrap_err()
            .is_unsupported()
    );

    let mut batch = Batch::new();
    assert!(session.start_batch(&mut batch).unwrap_err().is_unsupported());

    // Transactions still work on placeholder scopes
    session.begin().unwrap();
    session.commit().unwrap();
    session.close().unwrap();
}

#[test]
fn test_schema_checked_before_connection() {
    let backend = null_backend();
    let pool = backend.get_session_pool(backend.realm()).unwrap();
    let mut session = pool.create().unwrap();

    let unknown = Entity::new(QualName::parse("crm.Ghost").unwrap());
    let err = session.store_entity(&unknown).unwrap_err();

    assert!(matches!(err, RealmError::Schema(_)));
    assert!(!err.is_unsupported());
}
