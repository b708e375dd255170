// ============================================================================
// Storage
// ============================================================================
//
// Concrete stores behind the backends: the shared in-memory entity store
// used by MemoryBackend, and the file-backed delta repository.
//
// ============================================================================

pub mod file_repo;
pub mod memory;

pub use file_repo::{FileDeltaRepo, REPO_FILE_NAME};
pub use memory::{MemoryConnection, MemoryScope, MemoryStore};
