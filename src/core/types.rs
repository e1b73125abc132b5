// ============================================================================
// reactive-core - Core traits
// Type-erased Observable/Sink contracts that let Source Cells, Derived Cells,
// Effects and Scopes share one subscription mechanism despite differing
// payload types. This mirrors the teacher crate's AnySource/AnyReaction
// split, generalized around an explicit Subscription edge object instead of
// a direct Vec<Rc<dyn _>> edge (see SPEC_FULL.md §9, "Cyclic ownership").
// ============================================================================

use std::any::Any;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::ReactiveError;
use crate::primitives::subscription::SubscriptionHandle;

// =============================================================================
// IDENTITY
// =============================================================================

/// Process-unique, monotonically increasing identity for any Cell or Scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl CellId {
    pub(crate) fn next() -> Self {
        CellId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant distinguishing the three Cell/Scope-like kinds that share the
/// [`Observable`] capability set. Per SPEC_FULL.md §9 "Polymorphism of
/// cells": dispatch itself stays virtual (trait objects), but every node
/// exposes this tag for introspection and `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Source,
    Derived,
    Effect,
}

// =============================================================================
// OBSERVABLE (the source side of a Subscription)
// =============================================================================

/// Capability set shared by anything that can sit on the *source* end of a
/// Subscription: Source Cells, Derived Cells, and Effects (an Effect never
/// actually gains downstream subscribers per SPEC_FULL.md §4.5, but shares
/// the trait so the Scope tree and dispose machinery can treat all three
/// uniformly).
pub trait Observable: std::fmt::Debug {
    fn id(&self) -> CellId;
    fn kind(&self) -> CellKind;

    fn flags(&self) -> u32;
    fn set_flags(&self, flags: u32);

    fn is_disposed(&self) -> bool {
        self.flags() & crate::core::constants::DISPOSED != 0
    }
    fn is_dirty(&self) -> bool {
        self.flags() & crate::core::constants::DIRTY != 0
    }

    /// Append a weak back-reference to a Subscription now subscribed to this
    /// Observable; returns the index it was stored at (I1).
    fn add_downstream(&self, sub: Weak<dyn SubscriptionHandle>) -> usize;
    /// Pop-and-swap remove the downstream entry at `index`, returning the
    /// subscription that was moved into `index` (if any) so it can update
    /// its own recorded index.
    fn remove_downstream_at(&self, index: usize) -> Option<Rc<dyn SubscriptionHandle>>;
    fn downstream_len(&self) -> usize;

    /// If this Observable is itself a dependent (Derived Cell), run the
    /// §4.3 validation protocol; no-op for Source Cells.
    fn validate(&self);

    /// Current value, erased, for Subscriptions that need same-value-zero
    /// comparison without static knowledge of `T`. Must not register a
    /// dependency (this is the "peek" side only).
    fn peek_any(&self) -> Rc<dyn Any>;

    /// Broadcast `dirty()` to every enabled downstream subscription
    /// (SPEC_FULL.md §4.1 "dirty-all").
    fn broadcast_dirty(&self);
    /// Broadcast `next()` to every enabled downstream subscription
    /// (SPEC_FULL.md §4.1 "notify-all").
    fn broadcast_next(&self);
    /// Broadcast `complete()` to every downstream subscription, marking each
    /// disposed and clearing the list (SPEC_FULL.md §4.1 "complete-all").
    fn broadcast_complete(&self);
    /// Broadcast `error()` to every enabled downstream subscription.
    fn broadcast_error(&self, err: &ReactiveError);

    fn as_any(&self) -> &dyn Any;
}

/// Typed extension of [`Observable`] for the endpoints a `Subscription<T>`
/// actually binds to: lets the Subscription capture and compare snapshots
/// without boxing every read.
pub trait TypedObservable<T>: Observable {
    /// Current value without registering a dependency.
    fn peek(&self) -> T;
    /// Same-value-zero comparison (NaN equals NaN, +0 equals -0 for floats;
    /// ordinary `PartialEq` otherwise). See `crate::reactivity::equality`.
    fn identical(&self, a: &T, b: &T) -> bool;
}

// =============================================================================
// SUBSCRIPTION SINK (the consumer side of a Subscription)
// =============================================================================

/// Capability set implemented by whatever owns a Subscription's *consumer*
/// end: a Derived Cell, an Effect, or an external subscriber adapter.
///
/// Internal graph edges never need the pushed value itself — recomputation
/// always re-reads sources directly during the recipe, per the validation
/// protocol — so this trait is deliberately untyped. External
/// `subscribe(observer)` callers get a typed value via an adapter
/// (`crate::primitives::subscription::ExternalObserver`) that wraps this
/// trait and peeks the source itself when forwarding `next`.
pub trait SubscriptionSink {
    /// The source became dirty. Idempotent: a sink already dirty should
    /// no-op rather than re-propagate (SPEC_FULL.md §4.3 "dirty()").
    fn on_dirty(&self);
    /// The source's value actually changed (called after `on_dirty`).
    fn on_next(&self);
    /// The source disposed; this subscription is now severed.
    fn on_complete(&self);
    /// The source's recipe failed.
    fn on_error(&self, err: &ReactiveError);
}
