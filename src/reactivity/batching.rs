// ============================================================================
// reactive-core - Batching & flush
// Rust has no microtask queue, so the "microtask fence" of SPEC_FULL.md §5
// is realized as a synchronous drain at the end of the outermost `batch()`
// call, or immediately after an unbatched write (see §5 "Rust realization
// of the microtask fence"). `flush()` exposes that drain directly for
// callers who want to force it without wrapping in `batch`.
// ============================================================================

use crate::core::context::{with_context, MAX_FLUSH_ITERATIONS};
use crate::core::error::ReactiveError;

/// Batch multiple Source Cell writes into a single flush.
///
/// Without batching, each write immediately drains any cells it enqueued.
/// Inside `batch`, writes accumulate and the drain runs once, after the
/// outermost `batch` call returns.
///
/// # Example
///
/// ```
/// use reactive_core::{source, effect_sync, batch};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let a = source(1);
/// let b = source(2);
/// let runs = Rc::new(Cell::new(0));
///
/// let a2 = a.clone();
/// let b2 = b.clone();
/// let runs2 = runs.clone();
/// let _effect = effect_sync(move || {
///     let _ = a2.get() + b2.get();
///     runs2.set(runs2.get() + 1);
/// });
/// assert_eq!(runs.get(), 1);
///
/// batch(|| {
///     a.set(10);
///     b.set(20);
/// });
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    with_context(|ctx| ctx.enter_batch());

    struct BatchGuard;
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let depth = with_context(|ctx| ctx.exit_batch());
            if depth == 0 {
                flush();
            }
        }
    }
    let _guard = BatchGuard;
    f()
}

/// Whether a `batch()` call is currently active on this thread.
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

/// Read signals without registering a dependency on the active frame.
///
/// # Example
///
/// ```
/// use reactive_core::{source, untrack};
///
/// let a = source(1);
/// let value = untrack(|| a.get());
/// assert_eq!(value, 1);
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    with_context(|ctx| ctx.push_untracked());
    struct UntrackGuard;
    impl Drop for UntrackGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.pop_untracked());
        }
    }
    let _guard = UntrackGuard;
    f()
}

/// Force a synchronous drain of every Derived Cell / Effect currently
/// Queued, in FIFO enqueue order. A no-op while a `batch()` is active
/// (drain happens when the outermost batch exits) or while already
/// flushing (re-entrant writes from inside a recipe enqueue onto the same
/// drain rather than starting a nested one).
pub fn flush() {
    let should_run = with_context(|ctx| !ctx.is_batching() && !ctx.is_flushing());
    if !should_run {
        return;
    }
    drain_pending();
}

/// Called at the end of every unbatched Source Cell write.
pub(crate) fn after_write() {
    flush();
}

fn drain_pending() {
    with_context(|ctx| ctx.set_flushing(true));
    struct FlushGuard;
    impl Drop for FlushGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.set_flushing(false));
        }
    }
    let _guard = FlushGuard;

    let mut iterations = 0u32;
    loop {
        let batch = with_context(|ctx| ctx.take_pending());
        if batch.is_empty() {
            break;
        }
        for weak in batch {
            if let Some(node) = weak.upgrade() {
                if node.is_disposed() {
                    continue;
                }
                node.validate();
            }
        }
        iterations += 1;
        if iterations > MAX_FLUSH_ITERATIONS {
            panic!("{}", ReactiveError::RunawayPropagation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_reports_active_state() {
        assert!(!is_batching());
        batch(|| {
            assert!(is_batching());
        });
        assert!(!is_batching());
    }
}
