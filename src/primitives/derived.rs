// ============================================================================
// reactive-core - Derived Cell
// A Cell whose value is the result of a recipe over upstream Cells
// (SPEC_FULL.md §4.3). Both an Observable (source side, for its own
// subscribers) and a SubscriptionSink (consumer side, for its upstream
// reads) — the dual nature the teacher crate's AnySource+AnyReaction split
// on `DerivedInner` already captures, here mediated through Subscription
// edges instead of direct AnySource/AnyReaction pointers.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::{current_reactive_frame_or_none, with_context, Frame, ReactiveFrame};
use crate::core::error::ReactiveError;
use crate::core::scope_tree::{ChildTracker, ScopeNode};
use crate::core::types::{CellId, CellKind, Observable, SubscriptionSink, TypedObservable};
use crate::primitives::subscription::SubscriptionHandle;
use crate::reactivity::equality::EqualsFn;
use crate::reactivity::tracking::track_read;

/// The recipe a Derived Cell recomputes with. Returns `Err` to signal a
/// recoverable failure instead of panicking (SPEC_FULL.md §7 "recipes
/// return `Result<T, ReactiveError>` (preferred, idiomatic)").
pub type Recipe<T> = Box<dyn FnMut() -> Result<T, ReactiveError>>;
/// Writer for a Derived Cell constructed with `{getter, setter}`.
pub type Writer<T> = Box<dyn Fn(T)>;

pub(crate) struct DerivedCellInner<T> {
    id: CellId,
    flags: Cell<u32>,
    /// `None` is the never-computed sentinel (SPEC_FULL.md §4.3 step 1).
    value: RefCell<Option<T>>,
    equals: EqualsFn<T>,
    recipe: RefCell<Recipe<T>>,
    writer: RefCell<Option<Writer<T>>>,
    downstream: RefCell<Vec<Weak<dyn SubscriptionHandle>>>,
    upstream: RefCell<Vec<Rc<dyn SubscriptionHandle>>>,
    cursor: Cell<usize>,
    children: ChildTracker,
    self_weak: RefCell<Weak<DerivedCellInner<T>>>,
}

impl<T: Clone + 'static> DerivedCellInner<T> {
    pub(crate) fn new(recipe: impl FnMut() -> Result<T, ReactiveError> + 'static) -> Rc<Self>
    where
        T: PartialEq,
    {
        Self::with_equals(recipe, crate::reactivity::equality::equals)
    }

    pub(crate) fn with_equals(
        recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
        equals: EqualsFn<T>,
    ) -> Rc<Self> {
        Self::with_equals_and_parent(recipe, equals, None)
    }

    /// `explicit_parent`: `Some` attaches to that Scope regardless of which
    /// frame is currently active (SPEC_FULL.md §6 `parent_scope` option);
    /// `None` falls back to whatever reactive frame is active, if any.
    pub(crate) fn with_equals_and_parent(
        recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
        equals: EqualsFn<T>,
        explicit_parent: Option<Rc<dyn ScopeNode>>,
    ) -> Rc<Self> {
        let inner = Rc::new(DerivedCellInner {
            id: CellId::next(),
            flags: Cell::new(ENABLED | DIRTY),
            value: RefCell::new(None),
            equals,
            recipe: RefCell::new(Box::new(recipe)),
            writer: RefCell::new(None),
            downstream: RefCell::new(Vec::new()),
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
        inner
    }

    pub(crate) fn with_writer(
        recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
        writer: impl Fn(T) + 'static,
    ) -> Rc<Self>
    where
        T: PartialEq,
    {
        Self::with_equals_writer(recipe, crate::reactivity::equality::equals, writer)
    }

    pub(crate) fn with_equals_writer(
        recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
        equals: EqualsFn<T>,
        writer: impl Fn(T) + 'static,
    ) -> Rc<Self> {
        let cell = Self::with_equals(recipe, equals);
        *cell.writer.borrow_mut() = Some(Box::new(writer));
        cell
    }

    fn self_rc(&self) -> Rc<Self> {
        self.self_weak
            .borrow()
            .upgrade()
            .expect("DerivedCellInner::self_rc called after the Rc was dropped")
    }

    pub(crate) fn get(&self) -> Result<T, ReactiveError> {
        let result = catch_unwind(AssertUnwindSafe(|| self.validate_protected()));
        match result {
            Ok(Ok(())) => {
                let src: Rc<dyn TypedObservable<T>> = self.self_rc();
                track_read(&src);
                Ok(self.value.borrow().clone().expect("validated cell must have a value"))
            }
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(ReactiveError::from_panic_payload(payload)),
        }
    }

    pub(crate) fn set(&self, new_value: T) {
        let writer = self.writer.borrow();
        match writer.as_ref() {
            Some(w) => w(new_value),
            None => panic!("{}", ReactiveError::ReadonlyViolation),
        }
    }

    pub(crate) fn peek(&self) -> T {
        if self.is_dirty() {
            let _ = self.validate_protected();
        }
        self.value
            .borrow()
            .clone()
            .expect("validated cell must have a value")
    }

    pub(crate) fn upstream_len(&self) -> usize {
        self.upstream.borrow().len()
    }

    /// The validation protocol (SPEC_FULL.md §4.3). Returns `Err` (never
    /// panics itself at the top) only when the recipe genuinely produced
    /// an error; panics from inside the recipe are left to propagate
    /// through this call and are caught by `get()`'s `catch_unwind`.
    fn validate_protected(&self) -> Result<(), ReactiveError> {
        if !self.is_dirty() {
            return Ok(());
        }

        let never_computed = self.value.borrow().is_none();
        let mut outdated = never_computed;
        if !never_computed {
            for sub in self.upstream.borrow().iter() {
                if sub.is_outdated() {
                    outdated = true;
                    break;
                }
            }
        }

        if !outdated {
            self.flags.set(self.flags.get() & STATUS_MASK);
            return Ok(());
        }

        self.cursor.set(0);
        let self_rc = self.self_rc();
        let frame = Frame::Reactive(self_rc.clone() as Rc<dyn ReactiveFrame>);
        let outcome = with_context(|ctx| ctx.with_frame(frame, || (self.recipe.borrow_mut())()));

        match outcome {
            Ok(new_value) => {
                let cursor = self.cursor.get();
                self.upstream.borrow_mut().truncate(cursor);
                // Re-capture every live dependency's snapshot now, or a
                // Subscription reused unchanged across future re-runs would
                // keep comparing against its link-time value forever and
                // `is_outdated` could miss a later change that happens to
                // land back on that stale snapshot.
                for sub in self.upstream.borrow().iter() {
                    sub.refresh_snapshot();
                }

                let changed = match self.value.borrow().as_ref() {
                    Some(current) => !(self.equals)(current, &new_value),
                    None => true,
                };
                if changed {
                    *self.value.borrow_mut() = Some(new_value);
                    self.broadcast_next_internal();
                }
                self.flags.set(self.flags.get() & STATUS_MASK);
                Ok(())
            }
            Err(err) => {
                self.flags.set(self.flags.get() & !QUEUED);
                self.broadcast_error_internal(&err);
                Err(err)
            }
        }
    }

    fn broadcast_internal<F: Fn(&Rc<dyn SubscriptionHandle>)>(&self, call: F) {
        let mut i = 0;
        loop {
            let entry = self.downstream.borrow().get(i).cloned();
            let Some(weak) = entry else { break };
            if let Some(handle) = weak.upgrade() {
                call(&handle);
            }
            i += 1;
            if i >= self.downstream.borrow().len() {
                break;
            }
        }
    }

    fn broadcast_dirty_internal(&self) {
        self.broadcast_internal(|h| h.dispatch_dirty());
    }

    fn broadcast_next_internal(&self) {
        self.broadcast_internal(|h| h.dispatch_next());
    }

    fn broadcast_error_internal(&self, err: &ReactiveError) {
        self.broadcast_internal(|h| h.dispatch_error(err));
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
        self.broadcast_internal(|h| h.dispatch_complete());
        self.downstream.borrow_mut().clear();
        self.flags.set((self.flags.get() & !ENABLED) | DISPOSED);
        self.children.detach_from_parent();
    }
}

impl<T> std::fmt::Debug for DerivedCellInner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCell")
            .field("id", &self.id)
            .field("flags", &self.flags.get())
            .finish()
    }
}

impl<T: Clone + 'static> Observable for DerivedCellInner<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn kind(&self) -> CellKind {
        CellKind::Derived
    }

    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn add_downstream(&self, sub: Weak<dyn SubscriptionHandle>) -> usize {
        let mut list = self.downstream.borrow_mut();
        list.push(sub);
        list.len() - 1
    }

    fn remove_downstream_at(&self, index: usize) -> Option<Rc<dyn SubscriptionHandle>> {
        let mut list = self.downstream.borrow_mut();
        if index >= list.len() {
            return None;
        }
        list.swap_remove(index);
        if index < list.len() {
            if let Some(moved) = list[index].upgrade() {
                moved.set_source_index(index);
                return Some(moved);
            }
        }
        None
    }

    fn downstream_len(&self) -> usize {
        self.downstream.borrow().len()
    }

    fn validate(&self) {
        if let Err(err) = self.validate_protected() {
            panic!("{}", err);
        }
    }

    fn peek_any(&self) -> Rc<dyn Any> {
        Rc::new(self.peek())
    }

    fn broadcast_dirty(&self) {
        self.broadcast_dirty_internal();
    }

    fn broadcast_next(&self) {
        self.broadcast_next_internal();
    }

    fn broadcast_complete(&self) {
        self.broadcast_internal(|h| h.dispatch_complete());
        self.downstream.borrow_mut().clear();
    }

    fn broadcast_error(&self, err: &ReactiveError) {
        self.broadcast_error_internal(err);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> TypedObservable<T> for DerivedCellInner<T> {
    fn peek(&self) -> T {
        DerivedCellInner::peek(self)
    }

    fn identical(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }
}

impl<T: Clone + 'static> SubscriptionSink for DerivedCellInner<T> {
    fn on_dirty(&self) {
        if self.is_dirty() {
            return;
        }
        self.flags.set(self.flags.get() | DIRTY);
        self.broadcast_dirty_internal();
    }

    fn on_next(&self) {
        self.on_dirty();
        let already_queued = self.flags.get() & QUEUED != 0;
        if !already_queued && self.downstream_len() > 0 {
            self.flags.set(self.flags.get() | QUEUED);
            let weak: Weak<dyn Observable> = self.self_weak.borrow().clone();
            with_context(|ctx| ctx.enqueue(weak));
        }
    }

    fn on_complete(&self) {
        // An upstream completing doesn't itself invalidate a Derived Cell's
        // cache; the next `get()` will simply find that subscription's
        // source disposed and the edge already severed by `unsubscribe`.
    }

    fn on_error(&self, err: &ReactiveError) {
        self.broadcast_error_internal(err);
    }
}

impl<T: Clone + 'static> ReactiveFrame for DerivedCellInner<T> {
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

impl<T: Clone + 'static> ScopeNode for DerivedCellInner<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::source::SourceCellInner;

    #[test]
    fn first_get_computes_once() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let b = DerivedCellInner::new(move || Ok(a2.get() * 2));
        assert_eq!(b.get().unwrap(), 2);
        assert!(!b.is_dirty());
    }

    #[test]
    fn clean_read_does_not_recompute() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let calls = Rc::new(Cell::new(0));
        let calls2 = calls.clone();
        let b = DerivedCellInner::new(move || {
            calls2.set(calls2.get() + 1);
            Ok(a2.get() * 2)
        });
        b.get().unwrap();
        b.get().unwrap();
        b.get().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn dirty_on_upstream_change_recomputes() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let b = DerivedCellInner::new(move || Ok(a2.get() * 2));
        assert_eq!(b.get().unwrap(), 2);
        a.set_value(5);
        assert_eq!(b.get().unwrap(), 10);
    }

    #[test]
    fn revisiting_an_earlier_value_still_recomputes() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let b = DerivedCellInner::new(move || Ok(a2.get()));
        assert_eq!(b.get().unwrap(), 1);
        a.set_value(2);
        assert_eq!(b.get().unwrap(), 2, "recompute must refresh the subscription snapshot to 2");
        a.set_value(1);
        assert_eq!(b.get().unwrap(), 1, "a stale snapshot of 1 must not short-circuit this recompute");
    }

    #[test]
    fn recipe_error_leaves_cell_dirty_and_recoverable() {
        let a = SourceCellInner::new(1i32, false);
        let a2 = a.clone();
        let b = DerivedCellInner::new(move || {
            let v = a2.get();
            if v < 0 {
                Err(ReactiveError::RecipeFailed(Box::new(crate::core::error::StringError(
                    "negative".into(),
                ))))
            } else {
                Ok(v * 2)
            }
        });
        assert_eq!(b.get().unwrap(), 2);
        a.set_value(-1);
        assert!(b.get().is_err());
        a.set_value(3);
        assert_eq!(b.get().unwrap(), 6);
    }
}
