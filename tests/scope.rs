use reactive_effects::{
    create_effect, create_effect_with, create_effect_scope,
    get_current_scope, get_dep, on_scope_dispose, register_target, track,
    trigger, try_on_scope_dispose, EffectOptions, Key, ScopeError,
    TargetKind, TrackOp, TriggerOp,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

#[test]
fn stopping_a_scope_disposes_effects_and_runs_cleanups() {
    let obj = register_target(TargetKind::Plain);
    let runs_a = Rc::new(Cell::new(0));
    let runs_b = Rc::new(Cell::new(0));
    let cleanups = Rc::new(Cell::new(0));

    let scope = create_effect_scope(false);
    let (e1, e2) = scope
        .run({
            let runs_a = Rc::clone(&runs_a);
            let runs_b = Rc::clone(&runs_b);
            let cleanups = Rc::clone(&cleanups);
            move || {
                let e1 = create_effect({
                    let runs_a = Rc::clone(&runs_a);
                    move || {
                        runs_a.set(runs_a.get() + 1);
                        track(obj, TrackOp::Get, Key::prop("a"));
                    }
                });
                let e2 = create_effect({
                    let runs_b = Rc::clone(&runs_b);
                    move || {
                        runs_b.set(runs_b.get() + 1);
                        track(obj, TrackOp::Get, Key::prop("b"));
                    }
                });
                on_scope_dispose(move || cleanups.set(cleanups.get() + 1));
                (e1, e2)
            }
        })
        .unwrap();

    assert_eq!(runs_a.get(), 1);
    assert_eq!(runs_b.get(), 1);

    scope.stop();
    assert!(!scope.is_active());
    assert!(!e1.is_active());
    assert!(!e2.is_active());
    assert_eq!(cleanups.get(), 1);
    assert_eq!(
        get_dep(obj, &Key::prop("a")).unwrap().subscriber_count(),
        0
    );
    assert_eq!(
        get_dep(obj, &Key::prop("b")).unwrap().subscriber_count(),
        0
    );

    // their dependencies are dead writes now
    trigger(obj, TriggerOp::Set, Some(Key::prop("a")), None);
    trigger(obj, TriggerOp::Set, Some(Key::prop("b")), None);
    assert_eq!(runs_a.get(), 1);
    assert_eq!(runs_b.get(), 1);

    // stopping twice changes nothing
    scope.stop();
    assert_eq!(cleanups.get(), 1);
}

#[test]
fn cleanups_run_in_registration_order() {
    let order: Rc<RefCell<Vec<&'static str>>> =
        Rc::new(RefCell::new(Vec::new()));

    let scope = create_effect_scope(false);
    scope.run({
        let order = Rc::clone(&order);
        move || {
            on_scope_dispose({
                let order = Rc::clone(&order);
                move || order.borrow_mut().push("first")
            });
            on_scope_dispose({
                let order = Rc::clone(&order);
                move || order.borrow_mut().push("second")
            });
        }
    });

    scope.stop();
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}

#[test]
fn panicking_cleanup_does_not_starve_later_cleanups() {
    let ran = Rc::new(Cell::new(0));

    let scope = create_effect_scope(false);
    scope.run({
        let ran = Rc::clone(&ran);
        move || {
            on_scope_dispose(|| panic!("cleanup failure"));
            on_scope_dispose(move || ran.set(ran.get() + 1));
        }
    });

    scope.stop();
    assert_eq!(ran.get(), 1);
    assert!(!scope.is_active());
}

#[test]
fn stopping_a_parent_cascades_to_children() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));
    let child_cleanups = Rc::new(Cell::new(0));

    let parent = create_effect_scope(false);
    let child = parent
        .run({
            let runs = Rc::clone(&runs);
            let child_cleanups = Rc::clone(&child_cleanups);
            move || {
                let child = create_effect_scope(false);
                child.run(move || {
                    create_effect(move || {
                        runs.set(runs.get() + 1);
                        track(obj, TrackOp::Get, Key::prop("x"));
                    });
                    on_scope_dispose(move || {
                        child_cleanups.set(child_cleanups.get() + 1)
                    });
                });
                child
            }
        })
        .unwrap();

    parent.stop();
    assert!(!child.is_active());
    assert_eq!(child_cleanups.get(), 1);

    trigger(obj, TriggerOp::Set, Some(Key::prop("x")), None);
    assert_eq!(runs.get(), 1);
}

#[test]
fn detached_scopes_survive_the_parent() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));

    let parent = create_effect_scope(false);
    let detached = parent
        .run({
            let runs = Rc::clone(&runs);
            move || {
                let detached = create_effect_scope(true);
                detached.run(move || {
                    create_effect(move || {
                        runs.set(runs.get() + 1);
                        track(obj, TrackOp::Get, Key::prop("x"));
                    });
                });
                detached
            }
        })
        .unwrap();

    parent.stop();
    assert!(detached.is_active());

    trigger(obj, TriggerOp::Set, Some(Key::prop("x")), None);
    assert_eq!(runs.get(), 2);

    detached.stop();
    trigger(obj, TriggerOp::Set, Some(Key::prop("x")), None);
    assert_eq!(runs.get(), 2);
}

#[test]
fn stopping_one_child_leaves_its_siblings_intact() {
    let cleanups: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    let parent = create_effect_scope(false);
    let children = parent
        .run({
            let cleanups = Rc::clone(&cleanups);
            move || {
                (0..3)
                    .map(|i| {
                        let child = create_effect_scope(false);
                        child.run({
                            let cleanups = Rc::clone(&cleanups);
                            move || {
                                on_scope_dispose(move || {
                                    cleanups.borrow_mut().push(i)
                                });
                            }
                        });
                        child
                    })
                    .collect::<Vec<_>>()
            }
        })
        .unwrap();

    // stopping the first child swaps the last one into its slot
    children[0].stop();
    assert_eq!(*cleanups.borrow(), vec![0]);
    assert!(children[1].is_active());
    assert!(children[2].is_active());

    // the swapped child still detaches cleanly on its own
    children[2].stop();
    assert_eq!(*cleanups.borrow(), vec![0, 2]);

    parent.stop();
    assert_eq!(*cleanups.borrow(), vec![0, 2, 1]);
}

#[test]
fn run_reports_stopped_scopes() {
    let scope = create_effect_scope(false);
    assert_eq!(scope.run(|| 7), Some(7));

    scope.stop();
    assert_eq!(scope.run(|| 7), None);
    assert_eq!(scope.try_run(|| 7), Err(ScopeError::Stopped));
}

#[test]
fn current_scope_follows_run_nesting() {
    assert!(get_current_scope().is_none());

    let outer = create_effect_scope(false);
    let inner = create_effect_scope(false);
    outer.run(|| {
        assert_eq!(get_current_scope(), Some(outer));
        inner.run(|| {
            assert_eq!(get_current_scope(), Some(inner));
        });
        assert_eq!(get_current_scope(), Some(outer));
    });
    assert!(get_current_scope().is_none());
}

#[test]
fn cleanup_outside_any_scope_is_rejected() {
    assert_eq!(
        try_on_scope_dispose(|| {}),
        Err(ScopeError::NoActiveScope)
    );
    // the warning-only variant is a no-op
    on_scope_dispose(|| panic!("must never run"));
}

#[test]
fn effects_can_be_recorded_into_an_explicit_scope() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));

    let scope = create_effect_scope(false);
    // created outside scope.run(), attached by option
    let effect = create_effect_with(
        {
            let runs = Rc::clone(&runs);
            move || {
                runs.set(runs.get() + 1);
                track(obj, TrackOp::Get, Key::prop("x"));
            }
        },
        EffectOptions {
            scope: Some(scope),
            ..Default::default()
        },
    );
    assert_eq!(runs.get(), 1);

    scope.stop();
    assert!(!effect.is_active());
    trigger(obj, TriggerOp::Set, Some(Key::prop("x")), None);
    assert_eq!(runs.get(), 1);
}
