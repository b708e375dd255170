use super::config::SessionConfig;
use super::{Session, SessionConnection};
use crate::core::{RealmError, Result};
use crate::schema::Realm;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

type ConnectionFactory<C> = dyn Fn() -> Result<C> + Send + Sync;

pub(crate) struct PoolInner<C> {
    realm: Realm,
    factory: Box<ConnectionFactory<C>>,
    config: SessionConfig,
    next_id: AtomicU64,
    sessions_created: AtomicUsize,
    sessions_open: AtomicUsize,
}

impl<C> PoolInner<C> {
    pub(crate) fn session_closed(&self) {
        self.sessions_open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session factory bound to one realm.
///
/// Pools hold no sessions: `create()` opens a fresh connection through the
/// backend's factory and wires it into a new session. The only shared state
/// is a pair of counters, so a pool can be cloned and used from many threads.
pub struct SessionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for SessionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SessionConnection> SessionPool<C> {
    pub fn new<F>(realm: Realm, config: SessionConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<C> + Send + Sync + 'static,
    {
        config.validate().map_err(RealmError::Config)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                realm,
                factory: Box::new(factory),
                config,
                next_id: AtomicU64::new(1),
                sessions_created: AtomicUsize::new(0),
                sessions_open: AtomicUsize::new(0),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner<C>>) -> Self {
        Self { inner }
    }

    pub fn realm(&self) -> &Realm {
        &self.inner.realm
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Open a new session on this pool's realm
    pub fn create(&self) -> Result<Session<C>> {
        let connection = (self.inner.factory)()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        self.inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions_open.fetch_add(1, Ordering::SeqCst);

        debug!(session = id, realm = self.inner.realm.name(), "session created");
        Ok(Session::new(
            id,
            self.inner.realm.clone(),
            Arc::downgrade(&self.inner),
            connection,
            self.inner.config.clone(),
        ))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            sessions_created: self.inner.sessions_created.load(Ordering::SeqCst),
            sessions_open: self.inner.sessions_open.load(Ordering::SeqCst),
        }
    }

    /// Whether both handles refer to the same pool
    pub fn same_pool(&self, other: &SessionPool<C>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Session pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub sessions_created: usize,
    pub sessions_open: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool Stats: {} open, {} created",
            self.sessions_open, self.sessions_created
        )
    }
}
