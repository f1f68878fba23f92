use reactive_effects::{
    create_effect, create_effect_with, enable_tracking, get_dep,
    pause_tracking, register_target, reset_tracking, track, trigger,
    untracked, Dep, EffectOptions, Key, TargetKind, TrackOp, TriggerOp,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn paused_reads_subscribe_nothing() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));

    let effect = create_effect({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            track(obj, TrackOp::Get, Key::prop("a"));
            pause_tracking();
            track(obj, TrackOp::Get, Key::prop("b"));
            reset_tracking();
            track(obj, TrackOp::Get, Key::prop("c"));
        }
    });

    assert_eq!(effect.dep_count(), 2);
    // the paused read left the registry untouched
    assert!(get_dep(obj, &Key::prop("b")).is_none());

    trigger(obj, TriggerOp::Set, Some(Key::prop("b")), None);
    assert_eq!(runs.get(), 1);

    trigger(obj, TriggerOp::Set, Some(Key::prop("a")), None);
    assert_eq!(runs.get(), 2);

    trigger(obj, TriggerOp::Set, Some(Key::prop("c")), None);
    assert_eq!(runs.get(), 3);
}

#[test]
fn untracked_suspends_tracking_for_the_closure() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));

    create_effect({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            track(obj, TrackOp::Get, Key::prop("a"));
            untracked(|| track(obj, TrackOp::Get, Key::prop("b")));
        }
    });

    trigger(obj, TriggerOp::Set, Some(Key::prop("b")), None);
    assert_eq!(runs.get(), 1);

    trigger(obj, TriggerOp::Set, Some(Key::prop("a")), None);
    assert_eq!(runs.get(), 2);
}

#[test]
fn enable_tracking_overrides_a_paused_region() {
    let obj = register_target(TargetKind::Plain);
    let runs = Rc::new(Cell::new(0));

    let effect = create_effect({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            pause_tracking();
            enable_tracking();
            track(obj, TrackOp::Get, Key::prop("a"));
            reset_tracking();
            // back to paused
            track(obj, TrackOp::Get, Key::prop("b"));
            reset_tracking();
        }
    });

    assert_eq!(effect.dep_count(), 1);
    trigger(obj, TriggerOp::Set, Some(Key::prop("a")), None);
    assert_eq!(runs.get(), 2);
    trigger(obj, TriggerOp::Set, Some(Key::prop("b")), None);
    assert_eq!(runs.get(), 2);
}

#[test]
fn reads_outside_any_effect_subscribe_nothing() {
    let obj = register_target(TargetKind::Plain);
    track(obj, TrackOp::Get, Key::prop("a"));
    assert!(get_dep(obj, &Key::prop("a")).is_none());
}

#[test]
fn dep_introspection_follows_subscriptions() {
    let obj = register_target(TargetKind::Plain);
    let effect = create_effect(move || {
        track(obj, TrackOp::Get, Key::prop("a"));
    });

    let dep = get_dep(obj, &Key::prop("a")).unwrap();
    assert!(dep.contains(effect));
    assert_eq!(dep.subscriber_count(), 1);

    effect.stop();
    assert!(!dep.contains(effect));
    assert_eq!(dep.subscriber_count(), 0);
}

#[test]
fn marker_bits_are_clear_at_rest() {
    let obj = register_target(TargetKind::Plain);

    let inner = create_effect_with(
        move || {
            track(obj, TrackOp::Get, Key::prop("shared"));
        },
        EffectOptions {
            lazy: true,
            ..Default::default()
        },
    );
    // read the same property at two nesting depths
    create_effect(move || {
        track(obj, TrackOp::Get, Key::prop("shared"));
        inner.run();
    });

    let dep = get_dep(obj, &Key::prop("shared")).unwrap();
    assert_eq!(dep.subscriber_count(), 2);
    assert_eq!(dep.marker_bits(), (0, 0));

    trigger(obj, TriggerOp::Set, Some(Key::prop("shared")), None);
    assert_eq!(dep.marker_bits(), (0, 0));
}

#[test]
fn standalone_deps_track_and_trigger_directly() {
    let dep = Dep::new();
    let skip = Rc::new(Cell::new(false));
    let runs = Rc::new(Cell::new(0));

    let effect = create_effect({
        let skip = Rc::clone(&skip);
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            if !skip.get() {
                dep.track();
            }
        }
    });
    assert_eq!(dep.subscriber_count(), 1);
    assert_eq!(effect.dep_count(), 1);

    dep.trigger();
    assert_eq!(runs.get(), 2);

    // a run that does not re-read the dep unsubscribes from it
    skip.set(true);
    dep.trigger();
    assert_eq!(runs.get(), 3);
    assert_eq!(dep.subscriber_count(), 0);
    assert_eq!(effect.dep_count(), 0);

    dep.trigger();
    assert_eq!(runs.get(), 3);
}

#[test]
fn disposing_a_dep_unsubscribes_both_sides() {
    let dep = Dep::new();
    let effect = create_effect(move || dep.track());
    assert_eq!(effect.dep_count(), 1);

    dep.dispose();
    assert_eq!(effect.dep_count(), 0);
    // the handle is inert afterwards
    dep.trigger();
    assert_eq!(dep.subscriber_count(), 0);
}

#[test]
fn pre_populated_deps_reconcile_like_tracked_ones() {
    let runs_a = Rc::new(Cell::new(0));
    let runs_b = Rc::new(Cell::new(0));

    let a = create_effect_with(
        {
            let runs_a = Rc::clone(&runs_a);
            move || runs_a.set(runs_a.get() + 1)
        },
        EffectOptions {
            lazy: true,
            ..Default::default()
        },
    );
    let b = create_effect_with(
        {
            let runs_b = Rc::clone(&runs_b);
            move || runs_b.set(runs_b.get() + 1)
        },
        EffectOptions {
            lazy: true,
            ..Default::default()
        },
    );

    let dep = Dep::from_effects([a, b]);
    assert_eq!(dep.subscriber_count(), 2);

    dep.trigger();
    assert_eq!(runs_a.get(), 1);
    assert_eq!(runs_b.get(), 1);

    // neither run re-read the dep, so both unsubscribed
    assert_eq!(dep.subscriber_count(), 0);
    dep.trigger();
    assert_eq!(runs_a.get(), 1);
    assert_eq!(runs_b.get(), 1);
}
