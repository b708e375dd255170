// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Nested transaction scopes for sessions. The stack owns the ordering rules
// (push on begin, pop one level on commit/rollback, drain on rollback_all);
// a ScopeProvider supplied by the backend connection owns what a scope is.
//
// ============================================================================

pub mod stack;

pub use stack::{ScopeProvider, StackState, TransactionStack};
