// ============================================================================
// reactive-core - Effect
// Construction runs the recipe once synchronously, inside a frame that is
// itself (SPEC_FULL.md §4.5). Unlike a Derived Cell, an Effect produces no
// value and gains no subscribers of its own: it implements SubscriptionSink
// (consumer side) and the Scope-tree node contract, but not Observable —
// mirroring the teacher crate's AnyReaction-only treatment of pure side
// effects.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::{current_reactive_frame_or_none, with_context, Frame, ReactiveFrame};
use crate::core::error::ReactiveError;
use crate::core::scope_tree::{ChildTracker, ScopeNode};
use crate::core::types::{CellId, CellKind, Observable, SubscriptionSink};
use crate::primitives::subscription::SubscriptionHandle;

pub type EffectFn = Box<dyn FnMut() -> Result<(), ReactiveError>>;

pub(crate) struct EffectInner {
    id: CellId,
    flags: Cell<u32>,
    recipe: RefCell<EffectFn>,
    upstream: RefCell<Vec<Rc<dyn SubscriptionHandle>>>,
    cursor: Cell<usize>,
    children: ChildTracker,
    self_weak: RefCell<Weak<EffectInner>>,
}

impl EffectInner {
    /// Constructs the effect, attaches to the currently active frame (if
    /// any) as its parent, and runs the recipe once synchronously.
    pub(crate) fn new(recipe: impl FnMut() -> Result<(), ReactiveError> + 'static) -> Rc<Self> {
        Self::with_parent(recipe, None)
    }

    /// `explicit_parent`: `Some` attaches to that Scope regardless of which
    /// frame is currently active (SPEC_FULL.md §6 `parent_scope` option);
    /// `None` falls back to whatever reactive frame is active, if any.
    pub(crate) fn with_parent(
        recipe: impl FnMut() -> Result<(), ReactiveError> + 'static,
        explicit_parent: Option<Rc<dyn ScopeNode>>,
    ) -> Rc<Self> {
        let inner = Rc::new(EffectInner {
            id: CellId::next(),
            flags: Cell::new(ENABLED | EFFECT_ENABLED | DIRTY),
            recipe: RefCell::new(Box::new(recipe)),
            upstream: RefCell::new(Vec::new()),
            cursor: Cell::new(0),
            children: ChildTracker::new(),
            self_weak: RefCell::new(Weak::new()),
        });
        *inner.self_weak.borrow_mut() = Rc::downgrade(&inner);

        let parent_node = explicit_parent.or_else(|| current_reactive_frame_or_none().map(|f| f.as_scope_node()));
        if let Some(parent_node) = parent_node {
            let self_node: Rc<dyn ScopeNode> = inner.clone();
            inner.children.attach(parent_node, self_node);
        }

        inner.run();
        inner
    }

    pub(crate) fn kind(&self) -> CellKind {
        CellKind::Effect
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.flags.get() & DISPOSED != 0
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.flags.get() & DIRTY != 0
    }

    pub(crate) fn enabled(&self) -> bool {
        self.flags.get() & EFFECT_ENABLED != 0
    }

    /// Whether the recipe has executed at least once.
    pub(crate) fn has_run(&self) -> bool {
        self.flags.get() & EFFECT_RAN != 0
    }

    /// Disable: clears the Enabled flag. A disabled effect that receives a
    /// `next` leaves Dirty set but does not run (SPEC_FULL.md §4.5).
    pub(crate) fn disable(&self) {
        self.flags.set(self.flags.get() & !EFFECT_ENABLED);
    }

    /// Enable: re-sets the flag and, if Dirty, runs immediately — the next
    /// dependency change would otherwise have already fired while disabled.
    pub(crate) fn enable(&self) {
        if self.is_disposed() {
            return;
        }
        self.flags.set(self.flags.get() | EFFECT_ENABLED);
        if self.is_dirty() {
            self.run();
        }
    }

    /// Manual re-run, bypassing the dirty/enabled gate.
    pub(crate) fn run_manual(&self) {
        if self.is_disposed() {
            return;
        }
        self.run();
    }

    fn run(&self) {
        if self.is_disposed() {
            return;
        }

        // Re-run bookkeeping: dispose all child Scopes before the recipe
        // runs again, repeatedly disposing index 0 so pop-and-swap always
        // gravitates the next child into the front slot (SPEC_FULL.md §9).
        loop {
            let child = {
                let snapshot = self.children.children_snapshot();
                snapshot.into_iter().next()
            };
            match child {
                Some(c) => c.dispose_node(),
                None => break,
            }
        }

        self.cursor.set(0);
        let self_rc = self
            .self_weak
            .borrow()
            .upgrade()
            .expect("EffectInner::run called after the Rc was dropped");
        let frame = Frame::Reactive(self_rc as Rc<dyn ReactiveFrame>);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            with_context(|ctx| ctx.with_frame(frame, || (self.recipe.borrow_mut())()))
        }));

        let cursor = self.cursor.get();
        self.upstream.borrow_mut().truncate(cursor);
        self.flags.set((self.flags.get() & STATUS_MASK) | EFFECT_RAN);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // A recipe-returned error still counts as having run: the
                // effect does not retain Dirty the way a Derived Cell does,
                // since there is no caller-visible `get()` to surface it to.
                // It is simply dropped after being formed; effects have no
                // downstream to notify.
                let _ = err;
            }
            Err(payload) => {
                let _ = ReactiveError::from_panic_payload(payload);
            }
        }
    }

    pub(crate) fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        for child in self.children.take_children() {
            child.dispose_node();
        }
        for sub in self.upstream.borrow_mut().drain(..) {
            sub.unsubscribe();
        }
        self.flags.set((self.flags.get() & !ENABLED) | DISPOSED);
        self.children.detach_from_parent();
    }
}

impl std::fmt::Debug for EffectInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).field("flags", &self.flags.get()).finish()
    }
}

impl SubscriptionSink for EffectInner {
    fn on_dirty(&self) {
        self.flags.set(self.flags.get() | DIRTY);
    }

    fn on_next(&self) {
        self.on_dirty();
        // An Effect always enqueues itself on dirty regardless of
        // subscribers — it *is* the terminal subscriber (SPEC_FULL.md
        // §4.5). Still gated on Enabled: a disabled effect stays Dirty
        // without scheduling a run.
        if !self.enabled() {
            return;
        }
        let already_queued = self.flags.get() & QUEUED != 0;
        if !already_queued {
            self.flags.set(self.flags.get() | QUEUED);
            let weak: Weak<dyn Observable> = self.self_weak.borrow().clone();
            with_context(|ctx| ctx.enqueue(weak));
        }
    }

    fn on_complete(&self) {}

    fn on_error(&self, _err: &ReactiveError) {}
}

impl ReactiveFrame for EffectInner {
    fn frame_id(&self) -> CellId {
        self.id
    }

    fn cursor(&self) -> usize {
        self.cursor.get()
    }

    fn set_cursor(&self, cursor: usize) {
        self.cursor.set(cursor);
    }

    fn subscription_source_id_at(&self, index: usize) -> Option<CellId> {
        self.upstream.borrow().get(index).map(|s| s.source_id())
    }

    fn subscription_len(&self) -> usize {
        self.upstream.borrow().len()
    }

    fn push_subscription(&self, sub: Rc<dyn SubscriptionHandle>) {
        self.upstream.borrow_mut().push(sub);
    }

    fn truncate_subscriptions(&self, at: usize) {
        let tail: Vec<_> = self.upstream.borrow_mut().split_off(at.min(self.upstream.borrow().len()));
        for sub in tail {
            sub.unsubscribe();
        }
    }

    fn self_as_sink(&self) -> Weak<dyn SubscriptionSink> {
        self.self_weak.borrow().clone()
    }

    fn as_scope_node(self: Rc<Self>) -> Rc<dyn ScopeNode> {
        self
    }
}

impl ScopeNode for EffectInner {
    fn node_id(&self) -> CellId {
        self.id
    }

    fn add_child(&self, child: Rc<dyn ScopeNode>) -> usize {
        self.children.add_child(child)
    }

    fn remove_child_at(&self, index: usize) -> Option<Rc<dyn ScopeNode>> {
        self.children.remove_child_at(index)
    }

    fn set_own_index(&self, index: usize) {
        self.children.set_own_index(index);
    }

    fn dispose_node(&self) {
        self.dispose();
    }

    fn is_disposed_node(&self) -> bool {
        self.is_disposed()
    }
}

/// An Effect never gains subscribers of its own, but implements `Observable`
/// anyway so the flush queue (keyed on `Weak<dyn Observable>`) and the
/// dispose machinery can treat Source Cells, Derived Cells and Effects
/// uniformly (SPEC_FULL.md §9 "Polymorphism of cells").
impl Observable for EffectInner {
    fn id(&self) -> CellId {
        self.id
    }

    fn kind(&self) -> CellKind {
        CellKind::Effect
    }

    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn add_downstream(&self, _sub: Weak<dyn SubscriptionHandle>) -> usize {
        unreachable!("effects never gain subscribers")
    }

    fn remove_downstream_at(&self, _index: usize) -> Option<Rc<dyn SubscriptionHandle>> {
        None
    }

    fn downstream_len(&self) -> usize {
        0
    }

    fn validate(&self) {
        if self.is_dirty() && self.enabled() && !self.is_disposed() {
            self.run();
        } else {
            self.flags.set(self.flags.get() & !QUEUED);
        }
    }

    fn peek_any(&self) -> Rc<dyn std::any::Any> {
        Rc::new(())
    }

    fn broadcast_dirty(&self) {}
    fn broadcast_next(&self) {}
    fn broadcast_complete(&self) {}
    fn broadcast_error(&self, _err: &ReactiveError) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::source::SourceCellInner;
    use std::cell::Cell as StdCell;

    #[test]
    fn runs_once_on_construction() {
        let runs = Rc::new(StdCell::new(0));
        let runs2 = runs.clone();
        let effect = EffectInner::new(move || {
            runs2.set(runs2.get() + 1);
            Ok(())
        });
        assert_eq!(runs.get(), 1);
        assert!(effect.has_run());
    }

    #[test]
    fn has_run_persists_across_rerun() {
        let effect = EffectInner::with_parent(|| Ok(()), None);
        assert!(effect.has_run());
        // has_run stays set across later re-runs, unlike DIRTY/QUEUED.
        effect.run_manual();
        assert!(effect.has_run());
    }

    #[test]
    fn disable_suppresses_rerun() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let runs = Rc::new(StdCell::new(0));
        let runs2 = runs.clone();
        let effect = EffectInner::new(move || {
            let _ = a2.get();
            runs2.set(runs2.get() + 1);
            Ok(())
        });
        assert_eq!(runs.get(), 1);
        effect.disable();
        a.set_value(2);
        crate::reactivity::batching::flush();
        assert_eq!(runs.get(), 1);
        assert!(effect.is_dirty());
        effect.enable();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dispose_severs_upstream() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let effect = EffectInner::new(move || {
            let _ = a2.get();
            Ok(())
        });
        assert_eq!(a.downstream_len(), 1);
        effect.dispose();
        assert_eq!(a.downstream_len(), 0);
        assert!(effect.is_disposed());
    }
}
