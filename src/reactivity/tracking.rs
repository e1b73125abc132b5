// ============================================================================
// reactive-core - Dependency tracking
// The cursor-based Subscription reuse algorithm used while a Derived Cell
// or Effect recipe runs (SPEC_FULL.md §4.3 "Dependency reuse"). Plain
// Scope dependency collection lives on `Scope::observe` directly since it
// needs no cursor bookkeeping.
// ============================================================================

use std::rc::Rc;

use crate::core::context::ReactiveFrame;
use crate::core::types::{Observable, TypedObservable};
use crate::primitives::subscription::Subscription;

/// Called once per read of `source` while a reactive frame (`rf`) is active.
/// Reuses the Subscription already at the cursor position if it still
/// points at `source` (stable dependency shape — the common case across
/// re-runs); otherwise truncates the tail and appends a fresh Subscription
/// with a freshly captured snapshot.
pub(crate) fn reuse_or_link<T: 'static>(rf: Rc<dyn ReactiveFrame>, source: &Rc<dyn TypedObservable<T>>) {
    let cursor = rf.cursor();
    let reuse = rf.subscription_source_id_at(cursor) == Some(source.id());

    if reuse {
        rf.set_cursor(cursor + 1);
        return;
    }

    rf.truncate_subscriptions(cursor);
    let sub = Subscription::create(source.clone(), rf.self_as_sink(), cursor as isize);
    rf.push_subscription(sub);
    rf.set_cursor(cursor + 1);
}

/// Track a read of `source` against whatever frame (if any) is currently
/// active — the free-function entry point called from every Cell's `get()`.
pub(crate) fn track_read<T: 'static>(source: &Rc<dyn TypedObservable<T>>) {
    crate::core::context::with_context(|ctx| ctx.observe_current(source));
}

/// Record a read against a plain Scope frame specifically (used by Cells so
/// an active plain-Scope frame also sees the read, per SPEC_FULL.md §2
/// "reads inside an active Scope register the read cell as a dependency of
/// that Scope"). `observe_current` already routes to a plain Scope when one
/// is active, so this is kept only for call sites that want to observe a
/// type-erased `Observable` directly without a `TypedObservable` in hand.
#[allow(dead_code)]
pub(crate) fn observe_in_active_scope(source: Rc<dyn Observable>) {
    crate::core::context::with_context(|ctx| {
        if ctx.is_untracking() {
            return;
        }
        if let Some(crate::core::context::Frame::Plain(scope)) = ctx.frame_stack.borrow().last() {
            scope.observe(source);
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::primitives::derived::DerivedCellInner;
    use crate::primitives::source::SourceCellInner;

    #[test]
    fn reading_inside_derived_links_one_subscription() {
        let a = SourceCellInner::new(1i32, false);
        let a_clone = a.clone();
        let b = DerivedCellInner::new(move || Ok(a_clone.get() * 2));
        assert_eq!(b.get().unwrap(), 2);
        assert_eq!(b.upstream_len(), 1);
    }
}
