// ============================================================================
// reactive-core - A fine-grained reactivity runtime
// ============================================================================
//
// Source Cells, Derived Cells, Effects and Scopes form a dependency graph
// connected by Subscriptions. Writing a Source Cell marks its downstream
// dirty immediately; Derived Cells only actually recompute lazily, the next
// time they're read. A Reactive Object gives the same Cell machinery a
// transparent property-bag face.
// ============================================================================

pub mod core;
pub mod primitives;
pub mod reactivity;

use std::rc::Rc;

use core::error::ReactiveError;
use core::scope_tree::ScopeNode;
use core::types::{Observable, TypedObservable};
use primitives::derived::DerivedCellInner;
use primitives::effect::EffectInner;
use primitives::scope::{ScopeInner, ScopeParent};
use primitives::source::SourceCellInner;
use primitives::subscription::subscribe as subscribe_sink;
use reactivity::equality::EqualsFn;

pub use core::cancellation::CancellationToken;
pub use core::error::ReactiveError as Error;
pub use core::types::{CellId, CellKind};
pub use primitives::reactive_object::{PropertyRef, ReactiveObject, ReactiveObjectBuilder};
pub use primitives::subscription::{ExternalSubscription, Observer};
pub use reactivity::batching::{batch, flush, is_batching, untrack};
pub use reactivity::equality::{always_equals, equals, never_equals, safe_equals_f32, safe_equals_f64};

// =============================================================================
// OBSERVABLE INTEROP (SPEC_FULL.md §6 "Observable interop")
// =============================================================================

/// Self-identification to third-party observer code written against the
/// same trait — the Rust realization of "a well-known-symbol method
/// returning itself" (Rust has no runtime symbol registry).
pub trait AsObservable<T> {
    fn as_observable(&self) -> Rc<dyn TypedObservable<T>>;
    fn as_any_observable(&self) -> Rc<dyn Observable>;
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Construction-time options shared by every primitive (SPEC_FULL.md §6).
/// `parent_scope: None` means "attach to whatever frame is lexically active,
/// if any" for a Derived Cell or Effect, and "stay detached" for a Source
/// Cell or Scope (a Source Cell and a bare `Scope::new` have no ambient
/// "active frame" concept of their own to fall back to).
#[derive(Default)]
pub struct Options {
    pub cancellation_token: Option<CancellationToken>,
    pub parent_scope: Option<Scope>,
}

fn parent_node(options: &Options) -> Option<Rc<dyn ScopeNode>> {
    options.parent_scope.as_ref().map(|s| s.0.clone() as Rc<dyn ScopeNode>)
}

// =============================================================================
// SOURCE CELL
// =============================================================================

/// A Cell whose value is written directly (SPEC_FULL.md §4.2).
#[derive(Clone)]
pub struct Source<T>(Rc<SourceCellInner<T>>);

pub fn source<T: PartialEq + Clone + 'static>(value: T) -> Source<T> {
    Source(SourceCellInner::new(value, false))
}

pub fn source_with_equals<T: Clone + 'static>(value: T, equals: EqualsFn<T>) -> Source<T> {
    Source(SourceCellInner::with_equals(value, equals, false))
}

/// Same-value-zero semantics (NaN equals NaN) instead of `PartialEq`.
pub fn source_f64(value: f64) -> Source<f64> {
    Source(SourceCellInner::with_equals(value, safe_equals_f64, false))
}

pub fn source_f32(value: f32) -> Source<f32> {
    Source(SourceCellInner::with_equals(value, safe_equals_f32, false))
}

pub fn source_with_options<T: PartialEq + Clone + 'static>(value: T, options: Options) -> Source<T> {
    let cell = SourceCellInner::with_equals_and_parent(value, equals, false, parent_node(&options));
    attach_cancellation(&options.cancellation_token, &cell, SourceCellInner::dispose);
    Source(cell)
}

impl<T: Clone + 'static> Source<T> {
    pub fn get(&self) -> T {
        self.0.get()
    }

    pub fn peek(&self) -> T {
        self.0.peek()
    }

    pub fn set(&self, value: T) {
        self.0.set_value(value);
    }

    /// Enter forwarding mode from another Cell (SPEC_FULL.md §4.2
    /// "Forwarding"). Overrides whatever forwarding was previously active;
    /// a later plain `set` cancels it again.
    pub fn set_from(&self, upstream: &impl AsObservable<T>) {
        self.0.forward_from(upstream.as_observable());
    }

    pub fn dispose(&self) {
        self.0.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        Observable::is_disposed(self.0.as_ref())
    }

    pub fn subscribe(&self, observer: Observer<T>) -> ExternalSubscription<T> {
        subscribe_sink(self.0.clone(), observer)
    }
}

impl<T: Clone + 'static> AsObservable<T> for Source<T> {
    fn as_observable(&self) -> Rc<dyn TypedObservable<T>> {
        self.0.clone()
    }

    fn as_any_observable(&self) -> Rc<dyn Observable> {
        self.0.clone()
    }
}

/// Create a Source Cell already forwarding from another Cell (SPEC_FULL.md
/// §4.2: "A target first constructed with a cell starts in forwarding
/// mode").
pub fn source_from<T: PartialEq + Clone + 'static>(upstream: &impl AsObservable<T>) -> Source<T> {
    Source(SourceCellInner::new_forwarding(upstream.as_observable(), equals, false))
}

// =============================================================================
// DERIVED CELL
// =============================================================================

/// A Cell whose value is recomputed from a recipe over upstream Cells
/// (SPEC_FULL.md §4.3).
#[derive(Clone)]
pub struct Derived<T>(Rc<DerivedCellInner<T>>);

pub fn derived<T: PartialEq + Clone + 'static>(
    recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
) -> Derived<T> {
    Derived(DerivedCellInner::new(recipe))
}

pub fn derived_with_equals<T: Clone + 'static>(
    recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
    equals: EqualsFn<T>,
) -> Derived<T> {
    Derived(DerivedCellInner::with_equals(recipe, equals))
}

/// A read/write Derived Cell (SPEC_FULL.md §4.3 "writer"): `get` recomputes
/// via `recipe`, `set` delegates to `writer` instead of panicking
/// [`ReactiveError::ReadonlyViolation`].
pub fn derived_with_writer<T: PartialEq + Clone + 'static>(
    recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
    writer: impl Fn(T) + 'static,
) -> Derived<T> {
    Derived(DerivedCellInner::with_writer(recipe, writer))
}

pub fn derived_with_options<T: PartialEq + Clone + 'static>(
    recipe: impl FnMut() -> Result<T, ReactiveError> + 'static,
    options: Options,
) -> Derived<T> {
    let cell = DerivedCellInner::with_equals_and_parent(recipe, equals, parent_node(&options));
    attach_cancellation(&options.cancellation_token, &cell, DerivedCellInner::dispose);
    Derived(cell)
}

impl<T: Clone + 'static> Derived<T> {
    pub fn get(&self) -> Result<T, ReactiveError> {
        self.0.get()
    }

    pub fn peek(&self) -> T {
        self.0.peek()
    }

    /// Panics [`ReactiveError::ReadonlyViolation`] unless constructed with
    /// [`derived_with_writer`].
    pub fn set(&self, value: T) {
        self.0.set(value);
    }

    pub fn dispose(&self) {
        self.0.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        Observable::is_disposed(self.0.as_ref())
    }

    pub fn is_dirty(&self) -> bool {
        Observable::is_dirty(self.0.as_ref())
    }

    pub fn subscribe(&self, observer: Observer<T>) -> ExternalSubscription<T> {
        subscribe_sink(self.0.clone(), observer)
    }
}

impl<T: Clone + 'static> AsObservable<T> for Derived<T> {
    fn as_observable(&self) -> Rc<dyn TypedObservable<T>> {
        self.0.clone()
    }

    fn as_any_observable(&self) -> Rc<dyn Observable> {
        self.0.clone()
    }
}

// =============================================================================
// EFFECT
// =============================================================================

/// Runs a recipe for its side effects whenever any dependency read inside it
/// changes (SPEC_FULL.md §4.5). Runs once synchronously at construction.
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

/// An infallible recipe — the common case.
pub fn effect_sync(mut recipe: impl FnMut() + 'static) -> Effect {
    Effect(EffectInner::new(move || {
        recipe();
        Ok(())
    }))
}

pub fn effect(recipe: impl FnMut() -> Result<(), ReactiveError> + 'static) -> Effect {
    Effect(EffectInner::new(recipe))
}

pub fn effect_with_options(mut recipe: impl FnMut() + 'static, options: Options) -> Effect {
    let inner = EffectInner::with_parent(
        move || {
            recipe();
            Ok(())
        },
        parent_node(&options),
    );
    attach_cancellation(&options.cancellation_token, &inner, EffectInner::dispose);
    Effect(inner)
}

impl Effect {
    pub fn run(&self) {
        self.0.run_manual();
    }

    pub fn enable(&self) {
        self.0.enable();
    }

    pub fn disable(&self) {
        self.0.disable();
    }

    pub fn enabled(&self) -> bool {
        self.0.enabled()
    }

    pub fn dispose(&self) {
        self.0.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed()
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// A plain lifetime node: owns child Scopes/Derived Cells/Effects and an
/// unordered set of observed sources (SPEC_FULL.md §4.4).
#[derive(Clone)]
pub struct Scope(Rc<ScopeInner>);

/// Attaches to whatever reactive frame is currently active, if any.
pub fn effect_scope() -> Scope {
    Scope(ScopeInner::new(ScopeParent::Implicit))
}

/// A Scope with no parent regardless of the active frame.
pub fn detached_scope() -> Scope {
    Scope(ScopeInner::new(ScopeParent::Detached))
}

pub fn scope_with_options(options: Options) -> Scope {
    let inner = match parent_node(&options) {
        Some(_) => {
            let parent = options.parent_scope.expect("parent_node returned Some");
            ScopeInner::new(ScopeParent::Explicit(parent.0))
        }
        None => ScopeInner::new(ScopeParent::Detached),
    };
    attach_cancellation(&options.cancellation_token, &inner, ScopeInner::dispose);
    Scope(inner)
}

impl Scope {
    pub fn id(&self) -> u64 {
        self.0.id().as_u64()
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        self.0.run(f)
    }

    pub fn observed(&self) -> Vec<Rc<dyn Observable>> {
        self.0.observed_snapshot()
    }

    /// Ids of the child Scopes/Derived Cells/Effects currently owned by this
    /// Scope (SPEC_FULL.md §6 "enumerate children").
    pub fn child_ids(&self) -> Vec<CellId> {
        self.0.children_snapshot().iter().map(|c| c.node_id()).collect()
    }

    pub fn dispose(&self) {
        self.0.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed()
    }
}

fn attach_cancellation<I: 'static>(token: &Option<CancellationToken>, inner: &Rc<I>, dispose: fn(&I)) {
    if let Some(token) = token {
        let weak = Rc::downgrade(inner);
        token.on_abort(move || {
            if let Some(strong) = weak.upgrade() {
                dispose(&strong);
            }
        });
    }
}
