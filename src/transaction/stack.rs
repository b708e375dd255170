// ============================================================================
// Transaction Stack
// ============================================================================
//
// Nested transaction bookkeeping, independent of what a "scope" is on the
// underlying connection. The provider decides that: a placeholder, a
// savepoint, a real database transaction.
//
// State transitions:
//
//   Idle ──begin──> InTransaction(depth=1) ──begin──> depth+1
//    ^                   │
//    └──commit/rollback at depth 1, or rollback_all──┘
//
//   any ──close──> Closed
//
// ============================================================================

use crate::core::{RealmError, Result};
use tracing::{debug, warn};

/// Source of transaction scopes for a transaction stack
pub trait ScopeProvider {
    /// Handle for one open scope
    type Scope;

    /// Open a new scope nested `depth` levels deep (0 = outermost)
    fn begin_scope(&mut self, depth: usize) -> Result<Self::Scope>;

    fn commit_scope(&mut self, scope: Self::Scope) -> Result<()>;

    fn rollback_scope(&mut self, scope: Self::Scope) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Idle,
    InTransaction,
    Closed,
}

/// Stack of open scopes over one provider, most recent last.
///
/// Every scope gets a generation number when it is opened, unique for the
/// life of the stack, so callers can tell a scope apart from a later one
/// opened at the same depth.
pub struct TransactionStack<P: ScopeProvider> {
    provider: P,
    scopes: Vec<(u64, P::Scope)>,
    next_generation: u64,
    state: StackState,
}

impl<P: ScopeProvider> TransactionStack<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            scopes: Vec::new(),
            next_generation: 0,
            state: StackState::Idle,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Generation of the scope open at `depth` (1 = outermost)
    pub fn generation_at(&self, depth: usize) -> Option<u64> {
        let index = depth.checked_sub(1)?;
        self.scopes.get(index).map(|(generation, _)| *generation)
    }

    pub fn is_closed(&self) -> bool {
        self.state == StackState::Closed
    }

    /// True only while the stack is in the transactional state with at
    /// least one open scope
    pub fn in_transaction(&self) -> bool {
        self.state == StackState::InTransaction && !self.scopes.is_empty()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(RealmError::SessionClosed);
        }

        let depth = self.scopes.len();
        let scope = self.provider.begin_scope(depth)?;
        self.next_generation += 1;
        self.scopes.push((self.next_generation, scope));
        self.state = StackState::InTransaction;

        debug!(depth = depth + 1, "transaction scope opened");
        Ok(())
    }

    /// Commit the innermost scope.
    ///
    /// Calling this with nothing open is a caller bug: it panics in debug
    /// builds and returns `TransactionUnderflow` otherwise.
    pub fn commit(&mut self) -> Result<()> {
        debug_assert!(
            !self.scopes.is_empty(),
            "commit() called with no open transaction"
        );
        let (_, scope) = self.scopes.pop().ok_or(RealmError::TransactionUnderflow)?;
        self.settle_state();

        debug!(depth = self.scopes.len(), "transaction scope committed");
        self.provider.commit_scope(scope)
    }

    /// Roll back the innermost scope; a no-op when nothing is open
    pub fn rollback(&mut self) -> Result<()> {
        let Some((_, scope)) = self.scopes.pop() else {
            return Ok(());
        };
        self.settle_state();

        debug!(depth = self.scopes.len(), "transaction scope rolled back");
        self.provider.rollback_scope(scope)
    }

    /// Roll back every open scope, innermost first.
    ///
    /// Each scope is rolled back exactly once even if an earlier rollback
    /// fails; the first failure is returned after the stack is drained.
    pub fn rollback_all(&mut self) -> Result<()> {
        let open = self.scopes.len();
        let mut first_error = None;

        while let Some((_, scope)) = self.scopes.pop() {
            if let Err(err) = self.provider.rollback_scope(scope) {
                warn!(error = %err, "scope rollback failed while draining");
                first_error.get_or_insert(err);
            }
        }
        self.settle_state();

        if open > 0 {
            debug!(scopes = open, "all transaction scopes rolled back");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Mark the stack closed; later `begin` calls fail with `SessionClosed`
    pub fn close(&mut self) {
        self.state = StackState::Closed;
    }

    fn settle_state(&mut self) {
        if self.scopes.is_empty() && self.state == StackState::InTransaction {
            self.state = StackState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        next: usize,
        events: Vec<String>,
        fail_begin: bool,
        fail_rollback_of: Option<usize>,
    }

    impl ScopeProvider for Recorder {
        type Scope = usize;

        fn begin_scope(&mut self, depth: usize) -> Result<usize> {
            if self.fail_begin {
                return Err(RealmError::Connection("connection reset".into()));
            }
            self.next += 1;
            self.events.push(format!("begin {} at {}", self.next, depth));
            Ok(self.next)
        }

        fn commit_scope(&mut self, scope: usize) -> Result<()> {
            self.events.push(format!("commit {}", scope));
            Ok(())
        }

        fn rollback_scope(&mut self, scope: usize) -> Result<()> {
            self.events.push(format!("rollback {}", scope));
            if self.fail_rollback_of == Some(scope) {
                return Err(RealmError::Connection("rollback failed".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_depth_tracking() {
        let mut stack = TransactionStack::new(Recorder::default());
        assert_eq!(stack.depth(), 0);
        assert!(!stack.in_transaction());

        stack.begin().unwrap();
        stack.begin().unwrap();
        assert_eq!(stack.depth(), 2);
        assert!(stack.in_transaction());

        stack.rollback().unwrap();
        assert_eq!(stack.depth(), 1);
        stack.commit().unwrap();
        assert_eq!(stack.depth(), 0);
        assert!(!stack.in_transaction());
        assert_eq!(stack.state(), StackState::Idle);

        assert_eq!(
            stack.provider().events,
            vec!["begin 1 at 0", "begin 2 at 1", "rollback 2", "commit 1"]
        );
    }

    #[test]
    fn test_rollback_on_empty_is_noop() {
        let mut stack = TransactionStack::new(Recorder::default());
        stack.rollback().unwrap();
        assert_eq!(stack.depth(), 0);
        assert!(stack.provider().events.is_empty());
    }

    #[test]
    fn test_rollback_all_reverse_order() {
        let mut stack = TransactionStack::new(Recorder::default());
        for _ in 0..3 {
            stack.begin().unwrap();
        }
        stack.rollback_all().unwrap();

        assert_eq!(stack.depth(), 0);
        assert_eq!(
            &stack.provider().events[3..],
            &["rollback 3", "rollback 2", "rollback 1"]
        );
    }

    #[test]
    fn test_rollback_all_keeps_draining_after_failure() {
        let mut stack = TransactionStack::new(Recorder {
            fail_rollback_of: Some(2),
            ..Default::default()
        });
        for _ in 0..3 {
            stack.begin().unwrap();
        }

        assert!(matches!(stack.rollback_all(), Err(RealmError::Connection(_))));
        assert_eq!(stack.depth(), 0);
        assert_eq!(
            &stack.provider().events[3..],
            &["rollback 3", "rollback 2", "rollback 1"]
        );
    }

    #[test]
    fn test_begin_failure_leaves_depth() {
        let mut stack = TransactionStack::new(Recorder::default());
        stack.begin().unwrap();
        stack.provider_mut().fail_begin = true;

        assert!(matches!(stack.begin(), Err(RealmError::Connection(_))));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_reopened_scope_gets_new_generation() {
        let mut stack = TransactionStack::new(Recorder::default());
        assert_eq!(stack.generation_at(0), None);
        assert_eq!(stack.generation_at(1), None);

        stack.begin().unwrap();
        let first = stack.generation_at(1);
        assert!(first.is_some());

        stack.commit().unwrap();
        stack.begin().unwrap();
        assert_eq!(stack.depth(), 1);
        assert_ne!(stack.generation_at(1), first);

        stack.begin().unwrap();
        assert!(stack.generation_at(2) > stack.generation_at(1));
    }

    #[test]
    fn test_closed_stack_refuses_begin() {
        let mut stack = TransactionStack::new(Recorder::default());
        stack.close();
        assert!(matches!(stack.begin(), Err(RealmError::SessionClosed)));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "no open transaction"))]
    fn test_commit_underflow() {
        let mut stack = TransactionStack::new(Recorder::default());
        let result = stack.commit();
        assert!(matches!(result, Err(RealmError::TransactionUnderflow)));
    }
}
