#![forbid(unsafe_code)]

use crate::{
    dep::DepId,
    diagnostics::{TrackEvent, TriggerEvent},
    runtime::with_runtime,
    scope::{record_effect_scope, EffectScope},
};
use std::rc::Rc;

slotmap::new_key_type! {
    /// Unique ID assigned to an effect.
    pub struct EffectId;
}

// Everything the runtime knows about one effect: the user function, the
// subscriptions it holds, and the flags that steer re-execution. `parent`
// is live only while a nested run is on the stack; `defer_stop` /
// `defer_dispose` are set when teardown is requested from inside the
// effect's own run and honored when the run exits.
pub(crate) struct EffectState {
    pub(crate) f: Rc<dyn Fn()>,
    pub(crate) scheduler: Option<Rc<dyn Fn(Effect)>>,
    pub(crate) deps: Vec<DepId>,
    pub(crate) active: bool,
    pub(crate) parent: Option<EffectId>,
    pub(crate) defer_stop: bool,
    pub(crate) defer_dispose: bool,
    pub(crate) computed: bool,
    pub(crate) allow_recurse: bool,
    pub(crate) on_stop: Option<Box<dyn FnOnce()>>,
    pub(crate) on_track: Option<Rc<dyn Fn(&TrackEvent)>>,
    pub(crate) on_trigger: Option<Rc<dyn Fn(&TriggerEvent)>>,
}

/// Options for [`create_effect_with`].
///
/// ```
/// use reactive_effects::{create_effect_with, EffectOptions};
///
/// let effect = create_effect_with(
///     || { /* reads reported here are tracked */ },
///     EffectOptions {
///         lazy: true,
///         ..Default::default()
///     },
/// );
/// effect.run(); // a lazy effect first runs when asked to
/// ```
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the immediate first run; the caller will invoke
    /// [`Effect::run`] itself.
    pub lazy: bool,
    /// Called instead of [`Effect::run`] whenever a mutation schedules the
    /// effect. The scheduler receives the runner handle and decides when
    /// (or whether) to actually run it.
    pub scheduler: Option<Rc<dyn Fn(Effect)>>,
    /// Record the effect in this scope instead of the currently active one.
    pub scope: Option<EffectScope>,
    /// Let a trigger re-run the effect even while the effect itself is
    /// running. Only sound together with a scheduler or a convergent
    /// effect function.
    pub allow_recurse: bool,
    /// Mark the effect as backing a computed value: it re-runs ahead of
    /// plain effects in every trigger batch.
    pub computed: bool,
    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
    /// Debug-build callback invoked whenever the effect gains a
    /// subscription.
    pub on_track: Option<Rc<dyn Fn(&TrackEvent)>>,
    /// Debug-build callback invoked whenever a mutation schedules the
    /// effect.
    pub on_trigger: Option<Rc<dyn Fn(&TriggerEvent)>>,
}

/// The runner handle for an effect.
///
/// Effects re-run a function and track every observable read the function
/// makes, so that a later mutation of anything it read re-runs it. See
/// [`create_effect`].
///
/// The handle is a plain copyable id: use it to [`run`](Effect::run) the
/// effect manually, [`stop`](Effect::stop) it, or inspect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Effect {
    pub(crate) id: EffectId,
}

impl Effect {
    /// Re-executes the effect with tracking on, re-learning its
    /// dependencies.
    ///
    /// On a stopped effect this still evaluates the function, but without
    /// tracking anything. A run that is already on the current chain of
    /// nested runs is skipped.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(
            level = "trace",
            name = "Effect::run()",
            skip_all,
            fields(id = ?self.id)
        )
    )]
    pub fn run(&self) {
        with_runtime(|runtime| runtime.run_effect(self.id))
    }

    /// Stops the effect: removes it from every subscriber set and keeps it
    /// from ever re-running. Idempotent.
    ///
    /// Stopping the effect from inside its own run takes hold when the run
    /// exits.
    pub fn stop(&self) {
        with_runtime(|runtime| runtime.stop_effect(self.id))
    }

    /// Stops the effect and releases its state. The handle is inert
    /// afterwards.
    pub fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_effect(self.id))
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        with_runtime(|runtime| {
            runtime
                .effects
                .borrow()
                .get(self.id)
                .map(|e| e.active)
                .unwrap_or(false)
        })
    }

    /// The number of subscriber sets this effect is currently in.
    pub fn dep_count(&self) -> usize {
        with_runtime(|runtime| {
            runtime
                .effects
                .borrow()
                .get(self.id)
                .map(|e| e.deps.len())
                .unwrap_or(0)
        })
    }
}

/// Creates an effect and runs it once immediately.
///
/// Every observable read the function makes — reported through
/// [`track`](crate::track) or [`Dep::track`](crate::Dep::track) — becomes a
/// subscription, and a later mutation of any of them re-runs the function.
/// Each run re-learns the dependencies from scratch, so branches that
/// switch which properties they read always leave the effect subscribed to
/// exactly what the latest run read.
///
/// If an [`EffectScope`] is active, the effect is owned by it and dies with
/// it.
///
/// ```
/// use reactive_effects::*;
/// use std::{cell::Cell, rc::Rc};
///
/// let obj = register_target(TargetKind::Plain);
/// let runs = Rc::new(Cell::new(0));
///
/// create_effect({
///     let runs = Rc::clone(&runs);
///     move || {
///         track(obj, TrackOp::Get, Key::prop("name"));
///         runs.set(runs.get() + 1);
///     }
/// });
/// assert_eq!(runs.get(), 1);
///
/// trigger(obj, TriggerOp::Set, Some(Key::prop("name")), None);
/// assert_eq!(runs.get(), 2);
/// ```
pub fn create_effect(f: impl Fn() + 'static) -> Effect {
    create_effect_with(f, EffectOptions::default())
}

/// Creates an effect with explicit [`EffectOptions`]; unless `lazy` is
/// set, runs it once immediately.
#[cfg_attr(
    debug_assertions,
    tracing::instrument(level = "trace", skip_all)
)]
pub fn create_effect_with(
    f: impl Fn() + 'static,
    options: EffectOptions,
) -> Effect {
    let EffectOptions {
        lazy,
        scheduler,
        scope,
        allow_recurse,
        computed,
        on_stop,
        on_track,
        on_trigger,
    } = options;
    let effect = with_runtime(|runtime| Effect {
        id: runtime.effects.borrow_mut().insert(EffectState {
            f: Rc::new(f),
            scheduler,
            deps: Vec::new(),
            active: true,
            parent: None,
            defer_stop: false,
            defer_dispose: false,
            computed,
            allow_recurse,
            on_stop,
            on_track,
            on_trigger,
        }),
    });
    record_effect_scope(effect, scope);
    if !lazy {
        effect.run();
    }
    effect
}

/// Stops an effect through its runner handle. See [`Effect::stop`].
pub fn stop(effect: Effect) {
    effect.stop()
}

/// Suspends dependency tracking until the matching [`reset_tracking`].
///
/// Reads reported while tracking is paused subscribe nothing. Pairs nest:
/// each `pause_tracking`/[`enable_tracking`] pushes the previous state, and
/// [`reset_tracking`] restores it.
pub fn pause_tracking() {
    with_runtime(|runtime| {
        runtime
            .track_stack
            .borrow_mut()
            .push(runtime.should_track.get());
        runtime.should_track.set(false);
    })
}

/// Re-enables dependency tracking until the matching [`reset_tracking`],
/// even inside a paused region.
pub fn enable_tracking() {
    with_runtime(|runtime| {
        runtime
            .track_stack
            .borrow_mut()
            .push(runtime.should_track.get());
        runtime.should_track.set(true);
    })
}

/// Restores the tracking state saved by the matching [`pause_tracking`] or
/// [`enable_tracking`].
pub fn reset_tracking() {
    with_runtime(|runtime| {
        let last = runtime.track_stack.borrow_mut().pop();
        runtime.should_track.set(last.unwrap_or(true));
    })
}

/// Runs the given function with dependency tracking suspended.
///
/// Reads made inside the function do not subscribe the running effect to
/// anything. This can be used to isolate parts of the reactive graph from
/// one another:
///
/// ```
/// use reactive_effects::*;
/// use std::{cell::Cell, rc::Rc};
///
/// let obj = register_target(TargetKind::Plain);
/// let runs = Rc::new(Cell::new(0));
///
/// create_effect({
///     let runs = Rc::clone(&runs);
///     move || {
///         track(obj, TrackOp::Get, Key::prop("a"));
///         untracked(|| {
///             // this read will *not* re-run the effect when "b" changes
///             track(obj, TrackOp::Get, Key::prop("b"));
///         });
///         runs.set(runs.get() + 1);
///     }
/// });
/// assert_eq!(runs.get(), 1);
///
/// trigger(obj, TriggerOp::Set, Some(Key::prop("b")), None);
/// assert_eq!(runs.get(), 1);
///
/// trigger(obj, TriggerOp::Set, Some(Key::prop("a")), None);
/// assert_eq!(runs.get(), 2);
/// ```
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    struct ResetOnDrop;

    impl Drop for ResetOnDrop {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    pause_tracking();
    let _reset = ResetOnDrop;
    f()
}
