// ============================================================================
// Realmstore Library
// ============================================================================
//
// Schema-versioned entity storage: a realm's schema evolves through
// persisted deltas, and clients read and write entities through sessions
// that carry a stack of nested transactions.
//
// ============================================================================

//! Sessions, nested transactions and delta-driven schemas over pluggable
//! backends.
//!
//! # Examples
//!
//! ```
//! use realmstore::backend::{DataBackend, MemoryBackend, MetaBackend};
//! use realmstore::delta::{Delta, DeltaCommand, MemoryDeltaRepo};
//! use realmstore::schema::{ConceptDef, QualName};
//! use realmstore::Entity;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new(MemoryDeltaRepo::new);
//!
//! let person = QualName::parse("crm.Person")?;
//! backend.apply_delta(Delta::with_id(
//!     "init",
//!     vec![
//!         DeltaCommand::CreateModule { name: "crm".into() },
//!         DeltaCommand::CreateConcept(ConceptDef::new(person.clone())),
//!     ],
//! ))?;
//!
//! let pool = backend.get_session_pool(backend.realm())?;
//! let mut session = pool.create()?;
//!
//! session.begin()?;
//! session.store_entity(&Entity::new(person).with_attribute("name", "Alice"))?;
//! session.commit()?;
//!
//! assert_eq!(backend.store().entity_count()?, 1);
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod core;
pub mod delta;
pub mod schema;
pub mod session;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use backend::{
    ApplyMode, Backend, BackendConfig, DataBackend, MemoryBackend, MetaBackend, NullBackend,
};
pub use crate::core::{Batch, Entity, EntityId, LinkRef, RealmError, Result, SchemaError};
pub use delta::{Delta, DeltaId, DeltaRepo, DeltaSet, MemoryDeltaRepo, HEAD_REF};
pub use schema::{QualName, Realm, RealmMeta};
pub use session::config::SessionConfig;
pub use session::pool::{PoolStats, SessionPool};
pub use session::Session;
pub use storage::FileDeltaRepo;
