// ============================================================================
// reactive-core - Source Cell
// A Cell whose value is written directly; has no recipe (SPEC_FULL.md §4.2).
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::constants::{DISPOSED, ENABLED, SHALLOW};
use crate::core::error::ReactiveError;
use crate::core::scope_tree::{ChildTracker, ScopeNode};
use crate::core::types::{CellId, CellKind, Observable, SubscriptionSink, TypedObservable};
use crate::primitives::subscription::{Subscription, SubscriptionHandle};
use crate::reactivity::equality::EqualsFn;
use crate::reactivity::tracking::track_read;

// =============================================================================
// INNER
// =============================================================================

pub(crate) struct SourceCellInner<T> {
    id: CellId,
    flags: std::cell::Cell<u32>,
    value: RefCell<T>,
    downstream: RefCell<Vec<Weak<dyn SubscriptionHandle>>>,
    equals: EqualsFn<T>,
    /// Single inbound Subscription when this cell is in forwarding mode
    /// (SPEC_FULL.md §4.2 "Forwarding"). `None` for a plain writable cell.
    forward: RefCell<Option<Rc<Subscription<T>>>>,
    /// A Source Cell has no children of its own, but can still be the child
    /// of an explicit `parent_scope` option (SPEC_FULL.md §6), so disposing
    /// the parent Scope disposes it too.
    parent: ChildTracker,
    self_weak: RefCell<Weak<SourceCellInner<T>>>,
}

impl<T: PartialEq + Clone + 'static> SourceCellInner<T> {
    pub(crate) fn new(value: T, shallow: bool) -> Rc<Self> {
        Self::with_equals(value, crate::reactivity::equality::equals, shallow)
    }
}

impl<T: Clone + 'static> SourceCellInner<T> {
    pub(crate) fn with_equals(value: T, equals: EqualsFn<T>, shallow: bool) -> Rc<Self> {
        Self::with_equals_and_parent(value, equals, shallow, None)
    }

    pub(crate) fn with_equals_and_parent(
        value: T,
        equals: EqualsFn<T>,
        shallow: bool,
        parent_scope: Option<Rc<dyn ScopeNode>>,
    ) -> Rc<Self> {
        let flags = ENABLED | if shallow { SHALLOW } else { 0 };
        let inner = Rc::new(SourceCellInner {
            id: CellId::next(),
            flags: std::cell::Cell::new(flags),
            value: RefCell::new(value),
            downstream: RefCell::new(Vec::new()),
            equals,
            forward: RefCell::new(None),
            parent: ChildTracker::new(),
            self_weak: RefCell::new(Weak::new()),
        });
        *inner.self_weak.borrow_mut() = Rc::downgrade(&inner);
        if let Some(parent_scope) = parent_scope {
            let self_node: Rc<dyn ScopeNode> = inner.clone();
            inner.parent.attach(parent_scope, self_node);
        }
        inner
    }

    /// Create a cell already forwarding from `upstream` (SPEC_FULL.md §4.2:
    /// "A target first constructed with a cell starts in forwarding mode").
    pub(crate) fn new_forwarding(
        upstream: Rc<dyn TypedObservable<T>>,
        equals: EqualsFn<T>,
        shallow: bool,
    ) -> Rc<Self> {
        let initial = upstream.peek();
        let cell = Self::with_equals(initial, equals, shallow);
        cell.forward_from(upstream);
        cell
    }

    pub(crate) fn get(&self) -> T {
        let src: Rc<dyn TypedObservable<T>> = self
            .self_weak
            .borrow()
            .upgrade()
            .expect("SourceCellInner::get called after the Rc was dropped");
        track_read(&src);
        self.value.borrow().clone()
    }

    pub(crate) fn peek(&self) -> T {
        self.value.borrow().clone()
    }

    /// Plain write. Cancels forwarding if it was active (§4.2: "Setting any
    /// non-cell value on the target cancels forwarding").
    pub(crate) fn set_value(&self, new_value: T) {
        if self.is_disposed() {
            return;
        }
        self.cancel_forward();
        self.store_and_broadcast(new_value);
    }

    fn store_and_broadcast(&self, new_value: T) {
        let changed = {
            let current = self.value.borrow();
            !(self.equals)(&current, &new_value)
        };
        if !changed {
            return;
        }
        *self.value.borrow_mut() = new_value;
        self.broadcast_dirty();
        self.broadcast_next();
        crate::reactivity::batching::after_write();
    }

    /// Enter forwarding mode: install a single inbound Subscription to
    /// `upstream`'s stream (§4.2 "Forwarding"). Replaces any existing
    /// forward, and immediately adopts `upstream`'s current value rather
    /// than waiting for its next write.
    pub(crate) fn forward_from(&self, upstream: Rc<dyn TypedObservable<T>>) {
        self.cancel_forward();
        let initial = upstream.peek();
        let sink: Weak<dyn SubscriptionSink> = self.self_weak.borrow().clone();
        let sub = Subscription::create(upstream, sink, -1);
        *self.forward.borrow_mut() = Some(sub);
        self.store_and_broadcast(initial);
    }

    fn cancel_forward(&self) {
        if let Some(sub) = self.forward.borrow_mut().take() {
            sub.unsubscribe();
        }
    }

    pub(crate) fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.broadcast_complete();
        self.cancel_forward();
        self.flags.set((self.flags.get() & !ENABLED) | DISPOSED);
        self.parent.detach_from_parent();
    }

    fn broadcast<F: Fn(&Rc<dyn SubscriptionHandle>)>(&self, call: F) {
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
}

impl<T> Clone for SourceCellInner<T> {
    fn clone(&self) -> Self {
        unreachable!("SourceCellInner is always shared via Rc, never cloned by value")
    }
}

impl<T> std::fmt::Debug for SourceCellInner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCell")
            .field("id", &self.id)
            .field("flags", &self.flags.get())
            .finish()
    }
}

impl<T: Clone + 'static> Observable for SourceCellInner<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn kind(&self) -> CellKind {
        CellKind::Source
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
        // Source Cells never carry DIRTY/QUEUED; nothing to validate.
    }

    fn peek_any(&self) -> Rc<dyn Any> {
        Rc::new(self.value.borrow().clone())
    }

    fn broadcast_dirty(&self) {
        self.broadcast(|h| h.dispatch_dirty());
    }

    fn broadcast_next(&self) {
        self.broadcast(|h| h.dispatch_next());
    }

    fn broadcast_complete(&self) {
        self.broadcast(|h| h.dispatch_complete());
        self.downstream.borrow_mut().clear();
    }

    fn broadcast_error(&self, err: &ReactiveError) {
        self.broadcast(|h| h.dispatch_error(err));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> TypedObservable<T> for SourceCellInner<T> {
    fn peek(&self) -> T {
        self.value.borrow().clone()
    }

    fn identical(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }
}

impl<T: Clone + 'static> SubscriptionSink for SourceCellInner<T> {
    fn on_dirty(&self) {
        // Forwarding upstream became dirty; no local state to react to
        // until `on_next` delivers (or confirms) the new value.
    }

    fn on_next(&self) {
        if let Some(sub) = self.forward.borrow().clone() {
            let value = sub.source_value();
            self.store_and_broadcast(value);
        }
    }

    fn on_complete(&self) {
        // Upstream of a forward completed: adopt its last value and cease
        // forwarding (SPEC_FULL.md §9 open-question resolution).
        self.forward.borrow_mut().take();
    }

    fn on_error(&self, _err: &ReactiveError) {
        // Forwarding does not propagate recipe errors; a forwarded Source
        // Cell has no recipe of its own to fail.
    }
}

/// A Source Cell is always a leaf of the Scope tree — it never has children
/// of its own, only (optionally) a parent.
impl<T: Clone + 'static> ScopeNode for SourceCellInner<T> {
    fn node_id(&self) -> CellId {
        self.id
    }

    fn add_child(&self, _child: Rc<dyn ScopeNode>) -> usize {
        unreachable!("a Source Cell never gains child scopes")
    }

    fn remove_child_at(&self, _index: usize) -> Option<Rc<dyn ScopeNode>> {
        None
    }

    fn set_own_index(&self, index: usize) {
        self.parent.set_own_index(index);
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

    #[test]
    fn set_is_noop_when_identical() {
        let cell = SourceCellInner::new(1i32, false);
        assert_eq!(cell.downstream_len(), 0);
        cell.set_value(1);
        cell.set_value(1);
        assert_eq!(cell.peek(), 1);
    }

    #[test]
    fn set_broadcasts_on_change() {
        let cell = SourceCellInner::new(1i32, false);
        cell.set_value(2);
        assert_eq!(cell.peek(), 2);
    }

    #[test]
    fn dispose_marks_flags_and_completes() {
        let cell = SourceCellInner::new(1i32, false);
        cell.dispose();
        assert!(cell.is_disposed());
        cell.dispose(); // idempotent
        assert!(cell.is_disposed());
    }

    #[test]
    fn forwarding_adopts_upstream_value() {
        let upstream = SourceCellInner::new(1i32, false);
        let target = SourceCellInner::new(0i32, false);
        target.forward_from(upstream.clone() as Rc<dyn TypedObservable<i32>>);
        assert_eq!(target.peek(), 1);
        upstream.set_value(5);
        assert_eq!(target.peek(), 5);
    }

    #[test]
    fn plain_set_cancels_forwarding() {
        let upstream = SourceCellInner::new(1i32, false);
        let target = SourceCellInner::new(0i32, false);
        target.forward_from(upstream.clone() as Rc<dyn TypedObservable<i32>>);
        target.set_value(99);
        upstream.set_value(42);
        assert_eq!(target.peek(), 99, "forwarding must have been severed");
    }
}
