// ============================================================================
// reactive-core - Cancellation token
// A one-shot `aborted`/`on_abort` signal external code can attach to a
// Source Cell, Derived Cell, Effect or Scope to cut its lifetime short
// (SPEC_FULL.md §5 "Cancellation", §6 "Cancellation token").
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct CancellationInner {
    aborted: Cell<bool>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// A one-shot cancellation signal. Cloning shares the same underlying
/// signal (cheap `Rc` clone).
#[derive(Clone)]
pub struct CancellationToken(Rc<CancellationInner>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Rc::new(CancellationInner {
            aborted: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
        }))
    }

    /// A token that is already aborted at construction. Attaching a Cell,
    /// Effect or Scope to this yields a born-Disposed object whose
    /// subscribers immediately complete (SPEC_FULL.md §8 boundary
    /// behavior).
    pub fn already_aborted() -> Self {
        let token = Self::new();
        token.0.aborted.set(true);
        token
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.get()
    }

    /// Fire the abort event. Idempotent: a second call is a no-op.
    pub fn abort(&self) {
        if self.0.aborted.replace(true) {
            return;
        }
        for listener in std::mem::take(&mut *self.0.listeners.borrow_mut()) {
            listener();
        }
    }

    /// Register `f` to run exactly once when this token aborts. If already
    /// aborted, `f` runs immediately, synchronously.
    pub(crate) fn on_abort(&self, f: impl FnOnce() + 'static) {
        if self.is_aborted() {
            f();
            return;
        }
        self.0.listeners.borrow_mut().push(Box::new(f));
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("aborted", &self.is_aborted()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_runs_listeners_once() {
        let token = CancellationToken::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        token.on_abort(move || count2.set(count2.get() + 1));
        token.abort();
        token.abort();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn already_aborted_runs_listener_immediately() {
        let token = CancellationToken::already_aborted();
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        token.on_abort(move || ran2.set(true));
        assert!(ran.get());
    }
}
