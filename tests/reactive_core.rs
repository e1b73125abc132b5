use reactive_core::{
    batch, derived, derived_with_options, derived_with_writer, detached_scope, effect,
    effect_scope, effect_sync, effect_with_options, flush, scope_with_options, source,
    source_with_options, untrack, CancellationToken, Options, ReactiveObject,
};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn simple_derivation() {
    let a = source(1);
    let a2 = a.clone();
    let b = derived(move || Ok(a2.get() * 2));
    assert_eq!(b.get().unwrap(), 2);
    a.set(2);
    assert_eq!(b.get().unwrap(), 4);
}

#[test]
fn diamond_dependency_recomputes_exactly_twice() {
    let a = source(1);
    let (a2, a3) = (a.clone(), a.clone());
    let left = derived(move || Ok(a2.get() + 1));
    let right = derived(move || Ok(a3.get() * 10));
    let runs = Rc::new(Cell::new(0));
    let (runs2, left2, right2) = (runs.clone(), left.clone(), right.clone());
    let sum = derived(move || {
        runs2.set(runs2.get() + 1);
        Ok(left2.get()? + right2.get()?)
    });
    let _subscriber = sum.subscribe(Default::default());
    assert_eq!(sum.get().unwrap(), 12);
    a.set(2);
    flush();
    assert_eq!(sum.get().unwrap(), 23);
    assert_eq!(runs.get(), 2);
}

#[test]
fn conditional_dependency_switch_drops_unused_branch() {
    let cond = source(true);
    let a = source(1);
    let b = source(2);
    let (cond2, a2, b2) = (cond.clone(), a.clone(), b.clone());
    let picked = derived(move || if cond2.get() { Ok(a2.get()) } else { Ok(b2.get()) });
    assert_eq!(picked.get().unwrap(), 1);
    cond.set(false);
    assert_eq!(picked.get().unwrap(), 2);
    a.set(99);
    assert_eq!(picked.get().unwrap(), 2, "picked no longer depends on a");
}

#[test]
fn effect_batching_coalesces_into_one_rerun() {
    let x = source(0);
    let record = Rc::new(std::cell::RefCell::new(Vec::new()));
    let (x2, record2) = (x.clone(), record.clone());
    let _fx = effect_sync(move || record2.borrow_mut().push(x2.get()));
    // A synchronous write burst only coalesces when wrapped in `batch` —
    // Rust has no microtask fence to defer an unbatched write's drain past.
    batch(|| {
        x.set(1);
        x.set(2);
        x.set(3);
    });
    assert_eq!(*record.borrow(), vec![0, 3]);
}

#[test]
fn scope_dispose_tears_down_child_effect_and_clears_subscriptions() {
    let v = source(1);
    let scope = effect_scope();
    let runs = Rc::new(Cell::new(0));
    let (v2, runs2) = (v.clone(), runs.clone());
    scope.run(|| {
        let _fx = effect_sync(move || {
            let _ = v2.get();
            runs2.set(runs2.get() + 1);
        });
    });
    assert_eq!(runs.get(), 1);
    scope.dispose();
    assert!(scope.is_disposed());
    v.set(2);
    flush();
    assert_eq!(runs.get(), 1, "effect must not run after its scope disposed");
}

#[test]
fn reactive_object_round_trip_through_ref_for_property() {
    let u = ReactiveObject::builder().field("first", "A".to_string()).field("last", "B".to_string()).build();
    let u2 = u.clone();
    let full = derived(move || Ok(format!("{} {}", u2.get::<String>("first"), u2.get::<String>("last"))));
    assert_eq!(full.get().unwrap(), "A B");
    u.set("first", "C".to_string());
    assert_eq!(full.get().unwrap(), "C B");

    let ref_a = u.ref_for_property("first");
    let ref_b = u.ref_for_property("first");
    ref_a.set("D".to_string());
    assert_eq!(ref_b.get::<String>(), "D");
    assert_eq!(u.get::<String>("first"), "D");
}

#[test]
fn double_dispose_is_a_no_op() {
    let a = source(1);
    a.dispose();
    a.dispose();
    assert!(a.is_disposed());
}

#[test]
fn subscribe_then_unsubscribe_restores_downstream_count() {
    let a = source(1);
    let before = a.clone();
    let sub = before.subscribe(Default::default());
    sub.unsubscribe();
    // A second subscribe should occupy the same, now-empty slot.
    let sub2 = a.subscribe(Default::default());
    assert!(!sub2.is_disposed());
}

#[test]
fn write_that_does_not_change_value_notifies_nobody() {
    let a = source(1);
    let runs = Rc::new(Cell::new(0));
    let (a2, runs2) = (a.clone(), runs.clone());
    let _fx = effect_sync(move || {
        let _ = a2.get();
        runs2.set(runs2.get() + 1);
    });
    assert_eq!(runs.get(), 1);
    a.set(1);
    flush();
    assert_eq!(runs.get(), 1, "identical write must not trigger a rerun");
}

#[test]
fn clean_derived_read_multiple_times_invokes_recipe_once() {
    let a = source(1);
    let a2 = a.clone();
    let calls = Rc::new(Cell::new(0));
    let calls2 = calls.clone();
    let b = derived(move || {
        calls2.set(calls2.get() + 1);
        Ok(a2.get() * 2)
    });
    for _ in 0..5 {
        b.get().unwrap();
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn writer_backed_derived_cell_round_trips() {
    let celsius = source(0.0f64);
    let (c_get, c_set) = (celsius.clone(), celsius.clone());
    let fahrenheit = derived_with_writer(
        move || Ok(c_get.get() * 9.0 / 5.0 + 32.0),
        move |f: f64| c_set.set((f - 32.0) * 5.0 / 9.0),
    );
    assert_eq!(fahrenheit.get().unwrap(), 32.0);
    fahrenheit.set(212.0);
    assert_eq!(celsius.get(), 100.0);
}

#[test]
fn untracked_read_does_not_register_a_dependency() {
    let a = source(1);
    let a2 = a.clone();
    let calls = Rc::new(Cell::new(0));
    let calls2 = calls.clone();
    let b = derived(move || {
        calls2.set(calls2.get() + 1);
        Ok(untrack(|| a2.get()))
    });
    assert_eq!(b.get().unwrap(), 1);
    a.set(2);
    assert_eq!(b.get().unwrap(), 1, "derived cell has no recorded dependency on a");
    assert_eq!(calls.get(), 1);
}

#[test]
fn recipe_error_leaves_cell_recoverable() {
    use reactive_core::Error;
    let a = source(1i32);
    let a2 = a.clone();
    let b = derived(move || {
        let v = a2.get();
        if v < 0 {
            Err(Error::RecipeFailed(Box::new(reactive_core::Error::ReadonlyViolation)))
        } else {
            Ok(v * 2)
        }
    });
    assert_eq!(b.get().unwrap(), 2);
    a.set(-1);
    assert!(b.get().is_err());
    a.set(3);
    assert_eq!(b.get().unwrap(), 6);
}

#[test]
fn already_aborted_cancellation_token_disposes_at_birth() {
    let token = CancellationToken::already_aborted();
    let cell = source_with_options(1, Options { cancellation_token: Some(token), ..Default::default() });
    assert!(cell.is_disposed());
}

#[test]
fn explicit_parent_scope_option_attaches_regardless_of_lexical_context() {
    let parent = detached_scope();
    let d = derived_with_options(
        || Ok(1i32),
        Options { parent_scope: Some(parent.clone()), ..Default::default() },
    );
    assert_eq!(parent.child_ids().len(), 1);
    parent.dispose();
    assert!(d.is_disposed());
}

#[test]
fn scope_with_options_explicit_parent_nests_and_disposes() {
    let root = detached_scope();
    let child = scope_with_options(Options { parent_scope: Some(root.clone()), ..Default::default() });
    assert_eq!(root.child_ids().len(), 1);
    root.dispose();
    assert!(child.is_disposed());
}

#[test]
fn effect_with_options_cancellation_token_disposes_effect() {
    let token = CancellationToken::new();
    let count = Rc::new(Cell::new(0));
    let count2 = count.clone();
    let fx = effect_with_options(
        move || count2.set(count2.get() + 1),
        Options { cancellation_token: Some(token.clone()), ..Default::default() },
    );
    assert_eq!(count.get(), 1);
    token.abort();
    assert!(fx.is_disposed());
}

#[test]
fn batch_coalesces_multiple_source_writes_across_two_cells() {
    let a = source(0);
    let b = source(0);
    let runs = Rc::new(Cell::new(0));
    let (a2, b2, runs2) = (a.clone(), b.clone(), runs.clone());
    let _fx = effect_sync(move || {
        let _ = a2.get() + b2.get();
        runs2.set(runs2.get() + 1);
    });
    assert_eq!(runs.get(), 1);
    batch(|| {
        a.set(1);
        b.set(1);
        a.set(2);
    });
    assert_eq!(runs.get(), 2, "one coalesced rerun for the whole batch");
}

#[test]
fn effect_recipe_returning_err_still_counts_as_a_run() {
    let flag = source(false);
    let runs = Rc::new(Cell::new(0));
    let (flag2, runs2) = (flag.clone(), runs.clone());
    let _fx = effect(move || {
        runs2.set(runs2.get() + 1);
        if flag2.get() {
            Err(reactive_core::Error::ReadonlyViolation)
        } else {
            Ok(())
        }
    });
    assert_eq!(runs.get(), 1);
    flag.set(true);
    flush();
    assert_eq!(runs.get(), 2);
}
