// ============================================================================
// reactive-core - Scope tree
// Shared parent/child bookkeeping used by Scope, Derived Cell and Effect
// (all three are lifetime nodes per SPEC_FULL.md §4.4). Pop-and-swap with
// index bookkeeping on both ends, same discipline as a Subscription's two
// endpoints (§9 "Cyclic ownership").
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::types::CellId;

/// Capability set shared by anything that can sit in a Scope's child list:
/// a plain Scope, a Derived Cell, or an Effect.
pub(crate) trait ScopeNode {
    fn node_id(&self) -> CellId;
    fn add_child(&self, child: Rc<dyn ScopeNode>) -> usize;
    fn remove_child_at(&self, index: usize) -> Option<Rc<dyn ScopeNode>>;
    fn set_own_index(&self, index: usize);
    /// Dispose this node and everything beneath it, children first. Does
    /// not touch the parent's list; callers that need the parent-side
    /// pop-and-swap use `ChildTracker::detach_from_parent` separately.
    fn dispose_node(&self);
    fn is_disposed_node(&self) -> bool;
}

/// Embeddable parent/child bookkeeping. A Scope, Derived Cell or Effect
/// holds one of these and delegates `ScopeNode::add_child` /
/// `remove_child_at` / `set_own_index` to it.
pub(crate) struct ChildTracker {
    children: RefCell<Vec<Rc<dyn ScopeNode>>>,
    parent: RefCell<Option<Weak<dyn ScopeNode>>>,
    own_index: Cell<usize>,
}

impl ChildTracker {
    pub(crate) fn new() -> Self {
        ChildTracker {
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
            own_index: Cell::new(usize::MAX),
        }
    }

    /// Attach to `parent`, pushing `self_node` onto its child list. Panics
    /// if `parent` is already disposed (SPEC_FULL.md §4.4 "A disposed
    /// parent is a hard error at attach time").
    pub(crate) fn attach(&self, parent: Rc<dyn ScopeNode>, self_node: Rc<dyn ScopeNode>) {
        if parent.is_disposed_node() {
            panic!("{}", crate::core::error::ReactiveError::DisposedParent);
        }
        let index = parent.add_child(self_node);
        self.own_index.set(index);
        *self.parent.borrow_mut() = Some(Rc::downgrade(&parent));
    }

    pub(crate) fn add_child(&self, child: Rc<dyn ScopeNode>) -> usize {
        let mut list = self.children.borrow_mut();
        list.push(child);
        list.len() - 1
    }

    pub(crate) fn remove_child_at(&self, index: usize) -> Option<Rc<dyn ScopeNode>> {
        let mut list = self.children.borrow_mut();
        if index >= list.len() {
            return None;
        }
        list.swap_remove(index);
        if index < list.len() {
            let moved = list[index].clone();
            drop(list);
            moved.set_own_index(index);
            return Some(moved);
        }
        None
    }

    pub(crate) fn set_own_index(&self, index: usize) {
        self.own_index.set(index);
    }

    /// Remove every child from the list and return them, without touching
    /// `parent`. Used as dispose's first step: take the list so the
    /// children's own `detach_from_parent` calls (made while *they*
    /// dispose) never observe or mutate a half-iterated list.
    pub(crate) fn take_children(&self) -> Vec<Rc<dyn ScopeNode>> {
        std::mem::take(&mut self.children.borrow_mut())
    }

    pub(crate) fn children_snapshot(&self) -> Vec<Rc<dyn ScopeNode>> {
        self.children.borrow().clone()
    }

    pub(crate) fn child_len(&self) -> usize {
        self.children.borrow().len()
    }

    /// Step 3 of dispose: pop-and-swap remove self from the parent's child
    /// list, if a parent exists.
    pub(crate) fn detach_from_parent(&self) {
        if let Some(parent_weak) = self.parent.borrow_mut().take() {
            if let Some(parent) = parent_weak.upgrade() {
                parent.remove_child_at(self.own_index.get());
            }
        }
    }
}
