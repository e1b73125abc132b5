// ============================================================================
// reactive-core - Subscription
// The only first-class edge in the graph (SPEC_FULL.md §4.1). Stored as
// Rc<dyn SubscriptionHandle> on the consumer's upstream list (strong — a
// dependent keeps its dependencies alive) and Weak<dyn SubscriptionHandle>
// on the source's downstream list (weak — a source never keeps its
// observers alive). This is the same ownership direction the teacher crate
// already uses for its Vec<Rc<dyn AnySource>> deps / Vec<Weak<dyn
// AnyReaction>> reactions split, just mediated through an explicit edge
// object instead of a direct pointer (SPEC_FULL.md §9).
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::{SUB_DISPOSED, SUB_ENABLED};
use crate::core::error::ReactiveError;
use crate::core::types::{CellId, Observable, SubscriptionSink, TypedObservable};

/// Non-generic face of a `Subscription<T>`, stored heterogeneously in a
/// Derived Cell's or Effect's upstream list (which may depend on sources of
/// different payload types) and, weakly, in a source's downstream list.
pub(crate) trait SubscriptionHandle {
    fn source_id(&self) -> CellId;
    fn source(&self) -> Rc<dyn Observable>;

    fn source_index(&self) -> usize;
    fn set_source_index(&self, index: usize);
    /// -1 when this subscription has no consumer-side slot (e.g. the
    /// singleton closed subscription, or an external subscriber).
    fn consumer_index(&self) -> isize;
    fn set_consumer_index(&self, index: isize);

    fn flags(&self) -> u32;
    fn set_flags(&self, flags: u32);
    fn is_enabled(&self) -> bool {
        self.flags() & SUB_ENABLED != 0
    }
    fn is_disposed(&self) -> bool {
        self.flags() & SUB_DISPOSED != 0
    }

    /// Pop-and-swap removes this subscription from its source's downstream
    /// list and clears its own pointers. Idempotent.
    fn unsubscribe(&self);
    fn enable(&self);
    fn disable(&self);

    /// Has the source's current value diverged from the captured snapshot
    /// (same-value-zero)? Recursively validates the source first if the
    /// source is itself Dirty (SPEC_FULL.md §4.3 step 2).
    fn is_outdated(&self) -> bool;
    /// Re-capture the snapshot as the source's current value.
    fn refresh_snapshot(&self);

    fn dispatch_dirty(&self);
    fn dispatch_next(&self);
    fn dispatch_complete(&self);
    fn dispatch_error(&self, err: &ReactiveError);
}

/// A typed edge from `source: Rc<dyn TypedObservable<T>>` to a type-erased
/// consumer sink.
pub(crate) struct Subscription<T> {
    source: Rc<dyn TypedObservable<T>>,
    sink: RefCell<Weak<dyn SubscriptionSink>>,
    source_index: Cell<usize>,
    consumer_index: Cell<isize>,
    snapshot: RefCell<T>,
    flags: Cell<u32>,
    /// Weak self-reference, populated right after construction, so
    /// `enable()` can re-register this subscription on the source's
    /// downstream list without requiring `&Rc<Self>` at the call site.
    self_weak: RefCell<Weak<dyn SubscriptionHandle>>,
}

impl<T: 'static> Subscription<T> {
    /// Factory (SPEC_FULL.md §4.1). If `source` is already disposed, returns
    /// a closed subscription and immediately invokes `sink`'s `complete()`.
    /// Otherwise appends to `source`'s downstream list and records the
    /// index.
    pub(crate) fn create(
        source: Rc<dyn TypedObservable<T>>,
        sink: Weak<dyn SubscriptionSink>,
        consumer_index: isize,
    ) -> Rc<Self> {
        let snapshot = source.peek();
        let sub = Rc::new(Subscription {
            source: source.clone(),
            sink: RefCell::new(sink),
            source_index: Cell::new(usize::MAX),
            consumer_index: Cell::new(consumer_index),
            snapshot: RefCell::new(snapshot),
            flags: Cell::new(SUB_ENABLED),
            self_weak: RefCell::new(Weak::<Subscription<T>>::new()),
        });
        let handle: Rc<dyn SubscriptionHandle> = sub.clone();
        *sub.self_weak.borrow_mut() = Rc::downgrade(&handle);

        if source.is_disposed() {
            sub.flags.set(SUB_DISPOSED);
            if let Some(sink) = sub.sink.borrow().upgrade() {
                sink.on_complete();
            }
            return sub;
        }

        let index = source.add_downstream(Rc::downgrade(&handle));
        sub.source_index.set(index);
        sub
    }

    /// Current value of the upstream source, typed. Used by a forwarding
    /// Source Cell to adopt the value that triggered `on_next`.
    pub(crate) fn source_value(&self) -> T {
        self.source.peek()
    }
}

impl<T: 'static> SubscriptionHandle for Subscription<T> {
    fn source_id(&self) -> CellId {
        self.source.id()
    }

    fn source(&self) -> Rc<dyn Observable> {
        self.source.clone()
    }

    fn source_index(&self) -> usize {
        self.source_index.get()
    }

    fn set_source_index(&self, index: usize) {
        self.source_index.set(index);
    }

    fn consumer_index(&self) -> isize {
        self.consumer_index.get()
    }

    fn set_consumer_index(&self, index: isize) {
        self.consumer_index.set(index);
    }

    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn unsubscribe(&self) {
        if self.is_disposed() {
            return;
        }
        self.flags.set(SUB_DISPOSED);
        let index = self.source_index.get();
        if index != usize::MAX {
            self.source.remove_downstream_at(index);
        }
        self.source_index.set(usize::MAX);
        self.consumer_index.set(-1);
        let empty: Weak<dyn SubscriptionSink> = Weak::<ExternalObserverSink<T>>::new();
        *self.sink.borrow_mut() = empty;
    }

    fn enable(&self) {
        if self.is_disposed() || self.is_enabled() {
            return;
        }
        self.flags.set(self.flags.get() | SUB_ENABLED);
        if self.source_index.get() == usize::MAX {
            if let Some(handle) = self.self_weak.borrow().upgrade() {
                let index = self.source.add_downstream(Rc::downgrade(&handle));
                self.source_index.set(index);
            }
        }
    }

    fn disable(&self) {
        if !self.is_enabled() {
            return;
        }
        self.flags.set(self.flags.get() & !SUB_ENABLED);
        let index = self.source_index.get();
        if index != usize::MAX {
            self.source.remove_downstream_at(index);
            self.source_index.set(usize::MAX);
        }
    }

    fn is_outdated(&self) -> bool {
        if self.source.is_dirty() {
            self.source.validate();
        }
        let current = self.source.peek();
        let snapshot = self.snapshot.borrow();
        !self.source.identical(&current, &snapshot)
    }

    fn refresh_snapshot(&self) {
        *self.snapshot.borrow_mut() = self.source.peek();
    }

    fn dispatch_dirty(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Some(sink) = self.sink.borrow().upgrade() {
            sink.on_dirty();
        }
    }

    fn dispatch_next(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Some(sink) = self.sink.borrow().upgrade() {
            sink.on_next();
        }
    }

    fn dispatch_complete(&self) {
        if let Some(sink) = self.sink.borrow().upgrade() {
            sink.on_complete();
        }
        self.unsubscribe();
    }

    fn dispatch_error(&self, err: &ReactiveError) {
        if !self.is_enabled() {
            return;
        }
        if let Some(sink) = self.sink.borrow().upgrade() {
            sink.on_error(err);
        }
    }
}

/// Erased current-value accessor used by code that only has a
/// `Rc<dyn SubscriptionHandle>` and needs same-value-zero identity (e.g.
/// external interop). Internal validation never needs this: it goes through
/// `is_outdated`, which stays generic over `T`.
#[allow(dead_code)]
pub(crate) fn peek_any(handle: &dyn SubscriptionHandle) -> Rc<dyn Any> {
    handle.source().peek_any()
}

// =============================================================================
// EXTERNAL OBSERVER (SPEC_FULL.md §6 "Observer contract")
// =============================================================================

/// The four subscribe hooks. Missing hooks default to no-ops.
pub struct Observer<T> {
    pub next: Option<Box<dyn Fn(T)>>,
    pub error: Option<Box<dyn Fn(&ReactiveError)>>,
    pub complete: Option<Box<dyn Fn()>>,
    pub dirty: Option<Box<dyn Fn()>>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Observer { next: None, error: None, complete: None, dirty: None }
    }
}

/// Adapts the untyped [`SubscriptionSink`] edge to an external [`Observer`],
/// peeking the source itself to hand `next` a typed value (internal graph
/// edges never need this — recomputation always re-reads sources directly).
struct ExternalObserverSink<T> {
    source: Rc<dyn TypedObservable<T>>,
    observer: Observer<T>,
}

impl<T: 'static> SubscriptionSink for ExternalObserverSink<T> {
    fn on_dirty(&self) {
        if let Some(f) = &self.observer.dirty {
            f();
        }
    }

    fn on_next(&self) {
        if let Some(f) = &self.observer.next {
            f(self.source.peek());
        }
    }

    fn on_complete(&self) {
        if let Some(f) = &self.observer.complete {
            f();
        }
    }

    fn on_error(&self, err: &ReactiveError) {
        if let Some(f) = &self.observer.error {
            f(err);
        }
    }
}

/// A live external subscription. Dropping it does not unsubscribe (matching
/// `Subscription`'s own ownership direction — the source only holds a weak
/// back-reference); call [`ExternalSubscription::unsubscribe`] explicitly.
pub struct ExternalSubscription<T> {
    _sink: Rc<dyn SubscriptionSink>,
    handle: Rc<Subscription<T>>,
}

impl<T: 'static> ExternalSubscription<T> {
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    pub fn is_disposed(&self) -> bool {
        SubscriptionHandle::is_disposed(self.handle.as_ref())
    }
}

/// Subscribe an external [`Observer`] to `source` (SPEC_FULL.md §6). If
/// `source` is already disposed, `complete()` fires immediately and the
/// returned handle reports disposed.
pub(crate) fn subscribe<T: 'static>(
    source: Rc<dyn TypedObservable<T>>,
    observer: Observer<T>,
) -> ExternalSubscription<T> {
    let sink = Rc::new(ExternalObserverSink { source: source.clone(), observer });
    let sink_erased: Rc<dyn SubscriptionSink> = sink;
    let handle = Subscription::create(source, Rc::downgrade(&sink_erased), -1);
    ExternalSubscription { _sink: sink_erased, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    struct RecordingSink {
        dirty_count: StdCell<u32>,
        next_count: StdCell<u32>,
        complete_count: StdCell<u32>,
    }

    impl RecordingSink {
        fn new() -> Rc<Self> {
            Rc::new(RecordingSink {
                dirty_count: StdCell::new(0),
                next_count: StdCell::new(0),
                complete_count: StdCell::new(0),
            })
        }
    }

    impl SubscriptionSink for RecordingSink {
        fn on_dirty(&self) {
            self.dirty_count.set(self.dirty_count.get() + 1);
        }
        fn on_next(&self) {
            self.next_count.set(self.next_count.get() + 1);
        }
        fn on_complete(&self) {
            self.complete_count.set(self.complete_count.get() + 1);
        }
        fn on_error(&self, _err: &ReactiveError) {}
    }

    #[test]
    fn create_appends_to_source_downstream() {
        let source = crate::primitives::source::SourceCellInner::new(1i32, false);
        let sink = RecordingSink::new();
        let sub = Subscription::create(source.clone(), Rc::downgrade(&(sink.clone() as Rc<dyn SubscriptionSink>)), -1);
        assert_eq!(source.downstream_len(), 1);
        assert_eq!(sub.source_index(), 0);
    }

    #[test]
    fn unsubscribe_pop_and_swaps() {
        let source = crate::primitives::source::SourceCellInner::new(1i32, false);
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();
        let sub_a = Subscription::create(source.clone(), Rc::downgrade(&(sink_a.clone() as Rc<dyn SubscriptionSink>)), -1);
        let sub_b = Subscription::create(source.clone(), Rc::downgrade(&(sink_b.clone() as Rc<dyn SubscriptionSink>)), -1);
        assert_eq!(source.downstream_len(), 2);
        sub_a.unsubscribe();
        assert_eq!(source.downstream_len(), 1);
        assert_eq!(sub_b.source_index(), 0);
    }

    #[test]
    fn outdated_reflects_same_value_zero() {
        let source = crate::primitives::source::SourceCellInner::new(1.0f64, false);
        let sink = RecordingSink::new();
        let sub = Subscription::create(source.clone(), Rc::downgrade(&(sink.clone() as Rc<dyn SubscriptionSink>)), -1);
        assert!(!sub.is_outdated());
        source.set_value(f64::NAN);
        assert!(sub.is_outdated());
        sub.refresh_snapshot();
        assert!(!sub.is_outdated());
        source.set_value(f64::NAN);
        assert!(!sub.is_outdated(), "NaN should compare identical to itself");
    }
}
