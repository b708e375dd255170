pub mod error;
pub mod types;

pub use error::{RealmError, Result, SchemaError};
pub use types::{Batch, BatchState, Entity, EntityId, LinkRecord, LinkRef};
