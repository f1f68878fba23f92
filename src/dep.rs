#![forbid(unsafe_code)]

use crate::{
    diagnostics::{TrackContext, TriggerContext},
    effect::{Effect, EffectId},
    registry::{TrackOp, TriggerOp},
    runtime::{with_runtime, FxIndexSet},
};

slotmap::new_key_type! {
    /// Unique ID assigned to a subscriber set.
    pub struct DepId;
}

/// Recursion depths at which the marker-bit reconciliation protocol
/// applies. Runs nested more deeply than this fall back to clearing and
/// rebuilding their subscriptions in full.
///
/// The cap matches the protocol's reference semantics; raising it (there is
/// one spare bit in a `u32`) would change behavior at exactly depth 31, so
/// it stays where it is.
pub(crate) const MAX_MARKER_BITS: u32 = 30;

/// The marker bit for a given recursion depth. Depth 0 (no effect running)
/// owns bit 0; past the cap there is no marker bit and the slow path is in
/// force.
#[inline(always)]
pub(crate) fn marker_bit(depth: u32) -> u32 {
    if depth <= MAX_MARKER_BITS {
        1 << depth
    } else {
        0
    }
}

// One subscriber set: every effect currently subscribed to one
// `(target, key)` pair, in the order they first subscribed, plus the two
// per-depth marker masks the reconciliation protocol uses. `w` marks "was
// subscribed when the run at that depth started", `n` marks "re-read during
// that run". Outside any run both masks are 0.
#[derive(Default)]
pub(crate) struct DepState {
    pub(crate) subscribers: FxIndexSet<EffectId>,
    pub(crate) w: u32,
    pub(crate) n: u32,
}

impl DepState {
    #[inline(always)]
    pub(crate) fn was_tracked(&self, bit: u32) -> bool {
        self.w & bit != 0
    }

    #[inline(always)]
    pub(crate) fn newly_tracked(&self, bit: u32) -> bool {
        self.n & bit != 0
    }
}

/// A standalone subscriber set, for value cells that own their dependency
/// directly instead of going through the tracking registry.
///
/// A `ref`- or `computed`-style wrapper has exactly one observable value,
/// so it skips the registry's target/key indirection and holds a `Dep` of
/// its own: [`track`](Dep::track) on read, [`trigger`](Dep::trigger) on
/// write.
///
/// ```
/// use reactive_effects::{create_effect, Dep};
/// use std::{cell::Cell, rc::Rc};
///
/// // a minimal ref-style cell
/// let value = Rc::new(Cell::new(0));
/// let dep = Dep::new();
///
/// let seen = Rc::new(Cell::new(-1));
/// create_effect({
///     let (value, seen) = (Rc::clone(&value), Rc::clone(&seen));
///     move || {
///         dep.track();
///         seen.set(value.get());
///     }
/// });
/// assert_eq!(seen.get(), 0);
///
/// value.set(7);
/// dep.trigger();
/// assert_eq!(seen.get(), 7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dep {
    pub(crate) id: DepId,
}

impl Dep {
    /// Creates an empty subscriber set.
    pub fn new() -> Self {
        with_runtime(|runtime| Dep {
            id: runtime.deps.borrow_mut().insert(DepState::default()),
        })
    }

    /// Creates a subscriber set already holding the given effects, in
    /// iteration order.
    ///
    /// The subscriptions behave as if each effect had read the dep: an
    /// effect whose next run does not re-read it is unsubscribed again.
    pub fn from_effects(effects: impl IntoIterator<Item = Effect>) -> Self {
        with_runtime(|runtime| {
            let subscribers: FxIndexSet<EffectId> =
                effects.into_iter().map(|e| e.id).collect();
            let id = runtime.deps.borrow_mut().insert(DepState {
                subscribers: subscribers.clone(),
                w: 0,
                n: 0,
            });
            let mut effects = runtime.effects.borrow_mut();
            for effect_id in subscribers {
                if let Some(e) = effects.get_mut(effect_id) {
                    e.deps.push(id);
                }
            }
            Dep { id }
        })
    }

    /// Subscribes the running effect to this set, if tracking is on.
    pub fn track(&self) {
        with_runtime(|runtime| {
            if runtime.should_track.get()
                && runtime.active_effect.get().is_some()
            {
                let ctx = TrackContext::new(None, TrackOp::Get, None);
                runtime.track_dep(self.id, &ctx);
            }
        })
    }

    /// Re-runs every subscribed effect, computed-backed effects first.
    pub fn trigger(&self) {
        with_runtime(|runtime| {
            let ctx = TriggerContext::new(None, TriggerOp::Set, None, None);
            runtime.trigger_deps(&[self.id], &ctx);
        })
    }

    /// Whether the given effect is currently subscribed.
    pub fn contains(&self, effect: Effect) -> bool {
        with_runtime(|runtime| {
            runtime
                .deps
                .borrow()
                .get(self.id)
                .map(|dep| dep.subscribers.contains(&effect.id))
                .unwrap_or(false)
        })
    }

    /// The number of currently subscribed effects.
    pub fn subscriber_count(&self) -> usize {
        with_runtime(|runtime| {
            runtime
                .deps
                .borrow()
                .get(self.id)
                .map(|dep| dep.subscribers.len())
                .unwrap_or(0)
        })
    }

    #[doc(hidden)]
    pub fn marker_bits(&self) -> (u32, u32) {
        with_runtime(|runtime| {
            runtime
                .deps
                .borrow()
                .get(self.id)
                .map(|dep| (dep.w, dep.n))
                .unwrap_or((0, 0))
        })
    }

    /// Removes this set, unsubscribing every effect in it.
    pub fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_dep(self.id))
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}
