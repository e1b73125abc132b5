// ============================================================================
// reactive-core - Scope
// A plain lifetime node (SPEC_FULL.md §4.4): owns child Scopes/Derived
// Cells/Effects and an unordered, pointer-deduplicated set of observed
// sources. Unlike Derived Cells and Effects, a Scope never reuses
// Subscriptions by position — it is the "non-recomputing form of tracking"
// (introspection without commitment to recompute).
// ============================================================================

use std::rc::{Rc, Weak};

use crate::core::context::{current_reactive_frame_or_none, with_context, Frame, PlainFrame};
use crate::core::scope_tree::{ChildTracker, ScopeNode};
use crate::core::types::{CellId, Observable};

pub(crate) struct ScopeInner {
    id: CellId,
    disposed: std::cell::Cell<bool>,
    /// Deduplicated by pointer identity on insert (SPEC_FULL.md §9 Open
    /// Question decision: `Vec<Weak<dyn Observable>>`, O(n) scan per
    /// `observe()`, acceptable since scope dependency sets are small).
    observed: std::cell::RefCell<Vec<Weak<dyn Observable>>>,
    children: ChildTracker,
    self_weak: std::cell::RefCell<Weak<ScopeInner>>,
}

impl ScopeInner {
    /// `parent`: `None` attaches to whatever reactive frame is currently
    /// active (or stays detached if none is); `Some(None)` forces detached;
    /// `Some(Some(p))` attaches explicitly to `p`.
    pub(crate) fn new(parent: ScopeParent) -> Rc<Self> {
        let inner = Rc::new(ScopeInner {
            id: CellId::next(),
            disposed: std::cell::Cell::new(false),
            observed: std::cell::RefCell::new(Vec::new()),
            children: ChildTracker::new(),
            self_weak: std::cell::RefCell::new(Weak::new()),
        });
        *inner.self_weak.borrow_mut() = Rc::downgrade(&inner);

        let parent_node: Option<Rc<dyn ScopeNode>> = match parent {
            ScopeParent::Detached => None,
            ScopeParent::Explicit(p) => Some(p as Rc<dyn ScopeNode>),
            ScopeParent::Implicit => current_reactive_frame_or_none().map(|f| f.as_scope_node()),
        };
        if let Some(parent_node) = parent_node {
            let self_node: Rc<dyn ScopeNode> = inner.clone();
            inner.children.attach(parent_node, self_node);
        }

        inner
    }

    pub(crate) fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Run `f` with this Scope active as a plain (non-cursor) frame, so
    /// reads inside `f` register as observed sources of this Scope.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let self_rc: Rc<Self> =
            self.self_weak.borrow().upgrade().expect("ScopeInner::run called after the Rc was dropped");
        let frame = Frame::Plain(self_rc as Rc<dyn PlainFrame>);
        with_context(|ctx| ctx.with_frame(frame, f))
    }

    fn observe_source(&self, source: Rc<dyn Observable>) {
        let id = source.id();
        let mut list = self.observed.borrow_mut();
        let already_present = list.iter().any(|w| w.upgrade().map(|s| s.id()) == Some(id));
        if !already_present {
            list.push(Rc::downgrade(&source));
        }
    }

    pub(crate) fn observed_snapshot(&self) -> Vec<Rc<dyn Observable>> {
        self.observed.borrow().iter().filter_map(|w| w.upgrade()).collect()
    }

    pub(crate) fn children_snapshot(&self) -> Vec<Rc<dyn ScopeNode>> {
        self.children.children_snapshot()
    }

    pub(crate) fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        for child in self.children.take_children() {
            child.dispose_node();
        }
        self.disposed.set(true);
        self.children.detach_from_parent();
    }
}

/// How a new Scope (or Derived Cell / Effect) picks up its parent at
/// construction (SPEC_FULL.md §4.4).
pub(crate) enum ScopeParent {
    /// Attach to whatever reactive frame is currently active, if any.
    Implicit,
    /// Force detached regardless of any active frame.
    Detached,
    /// Attach to an explicitly given parent Scope.
    Explicit(Rc<ScopeInner>),
}

impl std::fmt::Debug for ScopeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("id", &self.id).field("disposed", &self.disposed.get()).finish()
    }
}

impl PlainFrame for ScopeInner {
    fn frame_id(&self) -> CellId {
        self.id
    }

    fn observe(&self, source: Rc<dyn Observable>) {
        self.observe_source(source);
    }
}

impl ScopeNode for ScopeInner {
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
