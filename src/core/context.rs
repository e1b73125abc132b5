// ============================================================================
// reactive-core - Reactive context
// The single process-wide "current frame" + "dependency cursor" stack
// (SPEC_FULL.md §5), plus the batch depth and the flush-pending queue.
// A thread_local mirrors the teacher crate's own ReactiveContext, kept as a
// single struct rather than scattered globals for the same reason: every
// frame entry must save and restore this state, even on error paths, and a
// struct makes that an RAII guard instead of four separate saves.
// ============================================================================

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::error::ReactiveError;
use crate::core::types::{CellId, Observable};

/// The active reactive frame: either a cursor-and-subscription-reusing
/// frame (Derived Cell or Effect) or a plain dependency-set Scope.
/// See SPEC_FULL.md §4.4 "Dependency tracking (plain scopes)" vs §4.3
/// "Dependency reuse".
pub(crate) enum Frame {
    Reactive(Rc<dyn ReactiveFrame>),
    Plain(Rc<dyn PlainFrame>),
}

impl Frame {
    pub(crate) fn id(&self) -> CellId {
        match self {
            Frame::Reactive(f) => f.frame_id(),
            Frame::Plain(f) => f.frame_id(),
        }
    }
}

/// A frame that reuses Subscriptions by position (Derived Cell, Effect).
pub(crate) trait ReactiveFrame {
    fn frame_id(&self) -> CellId;
    fn cursor(&self) -> usize;
    fn set_cursor(&self, cursor: usize);
    fn subscription_source_id_at(&self, index: usize) -> Option<CellId>;
    fn subscription_len(&self) -> usize;
    fn push_subscription(&self, sub: Rc<dyn crate::primitives::subscription::SubscriptionHandle>);
    fn truncate_subscriptions(&self, at: usize);
    fn self_as_sink(&self) -> Weak<dyn crate::core::types::SubscriptionSink>;
    /// Every reactive frame (Derived Cell, Effect) is also a Scope-tree node,
    /// used to attach it as a child of whichever frame was active at its
    /// construction (SPEC_FULL.md §4.4).
    fn as_scope_node(self: Rc<Self>) -> Rc<dyn crate::core::scope_tree::ScopeNode>;
}

/// A frame that only records presence (plain Scope).
pub(crate) trait PlainFrame {
    fn frame_id(&self) -> CellId;
    fn observe(&self, source: Rc<dyn Observable>);
}

// =============================================================================
// REACTIVE CONTEXT
// =============================================================================

pub struct ReactiveContext {
    pub(crate) frame_stack: RefCell<Vec<Frame>>,
    pub(crate) untracking: RefCell<Vec<bool>>,
    pub(crate) batch_depth: RefCell<u32>,
    /// Derived Cells and Effects awaiting the next flush, in enqueue order
    /// (FIFO drain per SPEC_FULL.md §5 "Ordering guarantees").
    pub(crate) pending: RefCell<Vec<Weak<dyn Observable>>>,
    pub(crate) flushing: RefCell<bool>,
}

/// Bound on the synchronous flush-drain loop. Exceeding it panics with
/// [`ReactiveError::RunawayPropagation`] — SPEC_FULL.md §5/§7's "implementations
/// may detect and error on re-entry."
pub const MAX_FLUSH_ITERATIONS: u32 = 1000;

impl ReactiveContext {
    fn new() -> Self {
        ReactiveContext {
            frame_stack: RefCell::new(Vec::new()),
            untracking: RefCell::new(Vec::new()),
            batch_depth: RefCell::new(0),
            pending: RefCell::new(Vec::new()),
            flushing: RefCell::new(false),
        }
    }

    pub(crate) fn is_untracking(&self) -> bool {
        self.untracking.borrow().last().copied().unwrap_or(false)
    }

    pub(crate) fn push_untracked(&self) {
        self.untracking.borrow_mut().push(true);
    }

    pub(crate) fn pop_untracked(&self) {
        self.untracking.borrow_mut().pop();
    }

    pub(crate) fn push_frame(&self, frame: Frame) {
        self.frame_stack.borrow_mut().push(frame);
    }

    pub(crate) fn pop_frame(&self) {
        self.frame_stack.borrow_mut().pop();
    }

    /// Run `f` with `frame` active; restores the prior frame even if `f`
    /// unwinds (SPEC_FULL.md §5 "every frame entry saves these and restores
    /// them on exit, including on error paths").
    pub(crate) fn with_frame<R>(&self, frame: Frame, f: impl FnOnce() -> R) -> R {
        self.push_frame(frame);
        struct PopGuard<'a>(&'a ReactiveContext);
        impl<'a> Drop for PopGuard<'a> {
            fn drop(&mut self) {
                self.0.pop_frame();
            }
        }
        let _guard = PopGuard(self);
        f()
    }

    pub(crate) fn current_reactive_frame(&self) -> Option<Rc<dyn ReactiveFrame>> {
        match self.frame_stack.borrow().last() {
            Some(Frame::Reactive(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub(crate) fn current_frame_snapshot(&self) -> Option<CellId> {
        self.frame_stack.borrow().last().map(Frame::id)
    }

    /// Route a dependency read to whichever frame is active, if any.
    pub(crate) fn observe_current<T: 'static>(
        &self,
        source: &Rc<dyn crate::core::types::TypedObservable<T>>,
    ) {
        if self.is_untracking() {
            return;
        }
        let frame = match self.frame_stack.borrow().last() {
            Some(Frame::Reactive(f)) => Some(Frame::Reactive(f.clone())),
            Some(Frame::Plain(f)) => Some(Frame::Plain(f.clone())),
            None => None,
        };
        match frame {
            Some(Frame::Plain(scope)) => {
                scope.observe(source.clone() as Rc<dyn Observable>);
            }
            Some(Frame::Reactive(rf)) => {
                crate::reactivity::tracking::reuse_or_link(rf, source);
            }
            None => {}
        }
    }

    pub(crate) fn is_batching(&self) -> bool {
        *self.batch_depth.borrow() > 0
    }

    pub(crate) fn enter_batch(&self) {
        *self.batch_depth.borrow_mut() += 1;
    }

    /// Returns the depth *after* exiting (0 means the outermost batch just
    /// closed and a flush should run).
    pub(crate) fn exit_batch(&self) -> u32 {
        let mut depth = self.batch_depth.borrow_mut();
        *depth = depth.saturating_sub(1);
        *depth
    }

    pub(crate) fn enqueue(&self, node: Weak<dyn Observable>) {
        self.pending.borrow_mut().push(node);
    }

    pub(crate) fn take_pending(&self) -> Vec<Weak<dyn Observable>> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn is_flushing(&self) -> bool {
        *self.flushing.borrow()
    }

    pub(crate) fn set_flushing(&self, value: bool) {
        *self.flushing.borrow_mut() = value;
    }
}

thread_local! {
    static CONTEXT: ReactiveContext = ReactiveContext::new();
}

/// Run `f` with exclusive access to the thread-local [`ReactiveContext`].
pub fn with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> R {
    CONTEXT.with(f)
}

/// The id of the currently active frame, or `None` if no Derived Cell,
/// Effect or Scope recipe is executing. Exposed for diagnostics.
pub fn current_frame_id() -> Option<CellId> {
    with_context(|ctx| ctx.current_frame_snapshot())
}

/// The active reactive frame (Derived Cell or Effect recipe), if any —
/// used at construction time to attach a new Derived Cell/Effect/Scope as
/// its child (SPEC_FULL.md §4.4).
pub(crate) fn current_reactive_frame_or_none() -> Option<Rc<dyn ReactiveFrame>> {
    with_context(|ctx| ctx.current_reactive_frame())
}

/// Convenience used by flush logic to surface a runaway-propagation error.
pub(crate) fn runaway_propagation_error() -> ReactiveError {
    ReactiveError::RunawayPropagation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_depth_tracks_enter_exit() {
        with_context(|ctx| {
            assert!(!ctx.is_batching());
            ctx.enter_batch();
            assert!(ctx.is_batching());
            let depth = ctx.exit_batch();
            assert_eq!(depth, 0);
            assert!(!ctx.is_batching());
        });
    }

    #[test]
    fn untracking_stack_nests() {
        with_context(|ctx| {
            assert!(!ctx.is_untracking());
            ctx.push_untracked();
            assert!(ctx.is_untracking());
            ctx.push_untracked();
            assert!(ctx.is_untracking());
            ctx.pop_untracked();
            assert!(ctx.is_untracking());
            ctx.pop_untracked();
            assert!(!ctx.is_untracking());
        });
    }
}
