#![forbid(unsafe_code)]

use crate::{
    dep::{marker_bit, DepId, DepState, MAX_MARKER_BITS},
    diagnostics::{TrackContext, TriggerContext},
    effect::{Effect, EffectId, EffectState},
    registry::{Key, Target, TargetId, TargetKind, TargetState, TrackOp, TriggerOp},
    scope::{ScopeId, ScopeState},
};
use core::hash::BuildHasherDefault;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;
use slotmap::SlotMap;
use std::{
    cell::{Cell, RefCell},
    fmt::Debug,
    rc::Rc,
};

pub(crate) type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

thread_local! {
    pub(crate) static RUNTIME: Runtime = Runtime::new();
}

// The data structure that owns all the effects, subscriber sets, tracked
// targets, and scopes of one thread's reactive world, together with the
// execution context of the effect currently running on it.
pub(crate) struct Runtime {
    pub effects: RefCell<SlotMap<EffectId, EffectState>>,
    pub deps: RefCell<SlotMap<DepId, DepState>>,
    pub targets: RefCell<SlotMap<TargetId, TargetState>>,
    pub scopes: RefCell<SlotMap<ScopeId, ScopeState>>,
    pub active_effect: Cell<Option<EffectId>>,
    pub active_scope: Cell<Option<ScopeId>>,
    pub should_track: Cell<bool>,
    pub track_stack: RefCell<Vec<bool>>,
    pub track_depth: Cell<u32>,
    pub track_op_bit: Cell<u32>,
}

impl Runtime {
    pub(crate) fn new() -> Self {
        Self {
            effects: Default::default(),
            deps: Default::default(),
            targets: Default::default(),
            scopes: Default::default(),
            active_effect: Cell::new(None),
            active_scope: Cell::new(None),
            should_track: Cell::new(true),
            track_stack: Default::default(),
            track_depth: Cell::new(0),
            track_op_bit: Cell::new(marker_bit(0)),
        }
    }
}

#[inline(always)]
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(|runtime| f(runtime))
}

// This core Runtime impl block handles running effects and reconciling
// their subscriptions across runs.
//
// Each run of an effect re-learns its dependencies. Rather than clearing
// every subscription up front and re-adding it on read, each subscriber set
// carries two bitmasks indexed by recursion depth: `w` records that the set
// was subscribed before the current run at that depth, `n` that it has been
// re-read during it. On exit, sets that were subscribed but not re-read are
// dropped on both sides; everything else is untouched. Past
// `MAX_MARKER_BITS` of effect nesting the marker bit is 0 and the slow path
// (full clear and rebuild) takes over.
impl Runtime {
    pub(crate) fn run_effect(&self, id: EffectId) {
        let snapshot = {
            let effects = self.effects.borrow();
            effects.get(id).map(|e| (e.active, Rc::clone(&e.f)))
        };
        let Some((active, f)) = snapshot else {
            crate::debug_warn!(
                "tried to run an effect that has already been disposed"
            );
            return;
        };

        // a stopped effect still evaluates, but subscribes to nothing
        if !active {
            f();
            return;
        }

        // refuse to re-enter an effect that is already running somewhere on
        // the current chain of nested runs
        {
            let effects = self.effects.borrow();
            let mut cursor = self.active_effect.get();
            while let Some(running) = cursor {
                if running == id {
                    return;
                }
                cursor = effects.get(running).and_then(|e| e.parent);
            }
        }

        let prev_effect = self.active_effect.get();
        let prev_should_track = self.should_track.get();
        if let Some(e) = self.effects.borrow_mut().get_mut(id) {
            e.parent = prev_effect;
        }
        self.active_effect.set(Some(id));
        self.should_track.set(true);

        let depth = self.track_depth.get() + 1;
        self.track_depth.set(depth);
        self.track_op_bit.set(marker_bit(depth));

        if depth <= MAX_MARKER_BITS {
            self.init_dep_markers(id);
        } else {
            self.clear_effect_deps(id);
        }

        // reconciliation and context restore live in a drop guard so that a
        // panicking effect function cannot leave the runtime mid-run
        let _finish = RunFinisher {
            runtime: self,
            id,
            prev_effect,
            prev_should_track,
        };
        f();
    }

    // mark every current subscription as carried over from the previous run
    fn init_dep_markers(&self, id: EffectId) {
        let bit = self.track_op_bit.get();
        let effects = self.effects.borrow();
        let Some(effect) = effects.get(id) else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        for dep_id in &effect.deps {
            if let Some(dep) = deps.get_mut(*dep_id) {
                dep.w |= bit;
                dep.n &= !bit;
            }
        }
    }

    // drop subscriptions that were carried over but not re-read this run,
    // and clear this depth's marker bits everywhere
    fn finalize_dep_markers(&self, id: EffectId) {
        let bit = self.track_op_bit.get();
        let mut effects = self.effects.borrow_mut();
        let Some(effect) = effects.get_mut(id) else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        let mut kept = 0;
        for i in 0..effect.deps.len() {
            let dep_id = effect.deps[i];
            let Some(dep) = deps.get_mut(dep_id) else {
                // the dep was disposed out from under us; drop it here too
                continue;
            };
            if dep.was_tracked(bit) && !dep.newly_tracked(bit) {
                dep.subscribers.shift_remove(&id);
            } else {
                effect.deps[kept] = dep_id;
                kept += 1;
            }
            dep.w &= !bit;
            dep.n &= !bit;
        }
        effect.deps.truncate(kept);
    }

    pub(crate) fn clear_effect_deps(&self, id: EffectId) {
        let mut effects = self.effects.borrow_mut();
        let Some(effect) = effects.get_mut(id) else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        for dep_id in effect.deps.drain(..) {
            if let Some(dep) = deps.get_mut(dep_id) {
                dep.subscribers.shift_remove(&id);
            }
        }
    }

    pub(crate) fn stop_effect(&self, id: EffectId) {
        // stopping the innermost running effect waits for its run to exit
        if self.active_effect.get() == Some(id) {
            if let Some(e) = self.effects.borrow_mut().get_mut(id) {
                e.defer_stop = true;
            }
            return;
        }
        let is_active = self
            .effects
            .borrow()
            .get(id)
            .map(|e| e.active)
            .unwrap_or(false);
        if !is_active {
            return;
        }
        self.clear_effect_deps(id);
        let on_stop = {
            let mut effects = self.effects.borrow_mut();
            match effects.get_mut(id) {
                Some(e) => {
                    e.active = false;
                    e.on_stop.take()
                }
                None => None,
            }
        };
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    pub(crate) fn dispose_effect(&self, id: EffectId) {
        if self.active_effect.get() == Some(id) {
            if let Some(e) = self.effects.borrow_mut().get_mut(id) {
                e.defer_stop = true;
                e.defer_dispose = true;
            }
            return;
        }
        self.stop_effect(id);
        self.effects.borrow_mut().remove(id);
    }
}

// Tracking: binding the running effect to subscriber sets.
impl Runtime {
    pub(crate) fn track(&self, target: Target, op: TrackOp, key: Key) {
        if !self.should_track.get() || self.active_effect.get().is_none() {
            return;
        }
        let ctx = TrackContext::new(Some(target), op, Some(&key));
        let dep_id = {
            let mut targets = self.targets.borrow_mut();
            match targets.get_mut(target.id) {
                Some(state) => *state.keys.entry(key).or_insert_with(|| {
                    self.deps.borrow_mut().insert(DepState::default())
                }),
                None => {
                    crate::debug_warn!(
                        "track() was called on a target that is not registered"
                    );
                    return;
                }
            }
        };
        self.track_dep(dep_id, &ctx);
    }

    pub(crate) fn track_dep(&self, dep_id: DepId, ctx: &TrackContext) {
        let Some(effect_id) = self.active_effect.get() else {
            return;
        };
        let bit = self.track_op_bit.get();
        let should_track = {
            let mut deps = self.deps.borrow_mut();
            let Some(dep) = deps.get_mut(dep_id) else {
                return;
            };
            let should = if self.track_depth.get() <= MAX_MARKER_BITS {
                if !dep.newly_tracked(bit) {
                    dep.n |= bit;
                    // only a first-time read in this run adds a subscription
                    !dep.was_tracked(bit)
                } else {
                    false
                }
            } else {
                !dep.subscribers.contains(&effect_id)
            };
            if should {
                dep.subscribers.insert(effect_id);
            }
            should
        };
        if should_track {
            {
                let mut effects = self.effects.borrow_mut();
                match effects.get_mut(effect_id) {
                    Some(e) => e.deps.push(dep_id),
                    None => {
                        // the running effect's state was freed mid-run; undo
                        // the half-registered subscription
                        if let Some(dep) =
                            self.deps.borrow_mut().get_mut(dep_id)
                        {
                            dep.subscribers.shift_remove(&effect_id);
                        }
                        return;
                    }
                }
            }
            #[cfg(debug_assertions)]
            {
                let on_track = self
                    .effects
                    .borrow()
                    .get(effect_id)
                    .and_then(|e| e.on_track.clone());
                if let Some(on_track) = on_track {
                    on_track(&ctx.event(Effect { id: effect_id }));
                }
            }
            #[cfg(not(debug_assertions))]
            {
                let _ = ctx;
            }
        }
    }
}

// Triggering: selecting subscriber sets for a mutation and notifying them.
impl Runtime {
    pub(crate) fn trigger(
        &self,
        target: Target,
        op: TriggerOp,
        key: Option<Key>,
        new_length: Option<usize>,
    ) {
        let selected: Vec<DepId> = {
            let targets = self.targets.borrow();
            let Some(state) = targets.get(target.id) else {
                return;
            };
            let mut selected = Vec::new();
            if op == TriggerOp::Clear {
                // every key of the target is invalidated
                selected.extend(state.keys.values().copied());
            } else if key == Some(Key::Length)
                && state.kind == TargetKind::Array
            {
                // truncation invalidates the length and every index at or
                // past the new length
                let new_length = new_length.unwrap_or(0);
                for (k, dep) in &state.keys {
                    match k {
                        Key::Length => selected.push(*dep),
                        Key::Index(i) if *i >= new_length => {
                            selected.push(*dep)
                        }
                        _ => {}
                    }
                }
            } else {
                if let Some(key) = &key {
                    if let Some(dep) = state.keys.get(key) {
                        selected.push(*dep);
                    }
                }
                match op {
                    TriggerOp::Add => {
                        if state.kind != TargetKind::Array {
                            if let Some(dep) = state.keys.get(&Key::Iterate) {
                                selected.push(*dep);
                            }
                            if state.kind == TargetKind::Map {
                                if let Some(dep) =
                                    state.keys.get(&Key::MapKeyIterate)
                                {
                                    selected.push(*dep);
                                }
                            }
                        } else if matches!(key, Some(Key::Index(_))) {
                            // a new index implies the array grew
                            if let Some(dep) = state.keys.get(&Key::Length) {
                                selected.push(*dep);
                            }
                        }
                    }
                    TriggerOp::Delete => {
                        if state.kind != TargetKind::Array {
                            if let Some(dep) = state.keys.get(&Key::Iterate) {
                                selected.push(*dep);
                            }
                            if state.kind == TargetKind::Map {
                                if let Some(dep) =
                                    state.keys.get(&Key::MapKeyIterate)
                                {
                                    selected.push(*dep);
                                }
                            }
                        }
                    }
                    TriggerOp::Set => {
                        // changing a map entry's value changes what
                        // iteration observes
                        if state.kind == TargetKind::Map {
                            if let Some(dep) = state.keys.get(&Key::Iterate) {
                                selected.push(*dep);
                            }
                        }
                    }
                    TriggerOp::Clear => {}
                }
            }
            selected
        };
        if selected.is_empty() {
            return;
        }
        let ctx =
            TriggerContext::new(Some(target), op, key.as_ref(), new_length);
        self.trigger_deps(&selected, &ctx);
    }

    pub(crate) fn trigger_deps(
        &self,
        dep_ids: &[DepId],
        ctx: &TriggerContext,
    ) {
        // snapshot the merged subscriber list up front: effects stopped,
        // disposed, or added during notification do not change who gets
        // notified by this trigger
        let snapshot: Vec<EffectId> = {
            let deps = self.deps.borrow();
            let mut merged = FxIndexSet::default();
            for dep_id in dep_ids {
                if let Some(dep) = deps.get(*dep_id) {
                    merged.extend(dep.subscribers.iter().copied());
                }
            }
            merged.into_iter().collect()
        };

        // computed-backed effects run first: anything else in this batch may
        // read their value and must not observe a stale one
        for &id in &snapshot {
            let computed = self
                .effects
                .borrow()
                .get(id)
                .map(|e| e.computed)
                .unwrap_or(false);
            if computed {
                self.trigger_effect(id, ctx);
            }
        }
        for &id in &snapshot {
            let plain = self
                .effects
                .borrow()
                .get(id)
                .map(|e| !e.computed)
                .unwrap_or(false);
            if plain {
                self.trigger_effect(id, ctx);
            }
        }
    }

    fn trigger_effect(&self, id: EffectId, ctx: &TriggerContext) {
        let snapshot = {
            let effects = self.effects.borrow();
            effects
                .get(id)
                .map(|e| (e.allow_recurse, e.scheduler.clone()))
        };
        let Some((allow_recurse, scheduler)) = snapshot else {
            return;
        };
        // a write from inside the effect that reads it would loop forever
        if self.active_effect.get() == Some(id) && !allow_recurse {
            return;
        }
        #[cfg(debug_assertions)]
        {
            let on_trigger = self
                .effects
                .borrow()
                .get(id)
                .and_then(|e| e.on_trigger.clone());
            if let Some(on_trigger) = on_trigger {
                on_trigger(&ctx.event(Effect { id }));
            }
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = ctx;
        }
        match scheduler {
            Some(scheduler) => scheduler(Effect { id }),
            None => self.run_effect(id),
        }
    }
}

// Registry teardown.
impl Runtime {
    pub(crate) fn dispose_target(&self, id: TargetId) {
        let Some(state) = self.targets.borrow_mut().remove(id) else {
            return;
        };
        for (_, dep_id) in state.keys {
            self.dispose_dep(dep_id);
        }
    }

    pub(crate) fn dispose_dep(&self, id: DepId) {
        let Some(dep) = self.deps.borrow_mut().remove(id) else {
            return;
        };
        let mut effects = self.effects.borrow_mut();
        for effect_id in dep.subscribers {
            if let Some(e) = effects.get_mut(effect_id) {
                e.deps.retain(|d| *d != id);
            }
        }
    }
}

struct RunFinisher<'a> {
    runtime: &'a Runtime,
    id: EffectId,
    prev_effect: Option<EffectId>,
    prev_should_track: bool,
}

impl Drop for RunFinisher<'_> {
    fn drop(&mut self) {
        let rt = self.runtime;
        let depth = rt.track_depth.get();
        if depth <= MAX_MARKER_BITS {
            rt.finalize_dep_markers(self.id);
        }
        rt.track_depth.set(depth - 1);
        rt.track_op_bit.set(marker_bit(depth - 1));
        rt.active_effect.set(self.prev_effect);
        rt.should_track.set(self.prev_should_track);
        let (defer_stop, defer_dispose) = {
            let mut effects = rt.effects.borrow_mut();
            match effects.get_mut(self.id) {
                Some(e) => {
                    e.parent = None;
                    (
                        std::mem::take(&mut e.defer_stop),
                        std::mem::take(&mut e.defer_dispose),
                    )
                }
                None => (false, false),
            }
        };
        if defer_stop || defer_dispose {
            rt.stop_effect(self.id);
        }
        if defer_dispose {
            rt.effects.borrow_mut().remove(self.id);
        }
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("active_effect", &self.active_effect)
            .field("active_scope", &self.active_scope)
            .field("should_track", &self.should_track)
            .field("track_depth", &self.track_depth)
            .finish()
    }
}
