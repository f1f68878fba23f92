#![forbid(unsafe_code)]

use crate::{
    dep::{Dep, DepId},
    runtime::{with_runtime, FxIndexMap},
};
use std::borrow::Cow;

slotmap::new_key_type! {
    /// Unique ID assigned to a tracked target.
    pub struct TargetId;
}

/// The shape of a tracked target, as far as invalidation is concerned.
///
/// The registry never sees the target's data; the shape only steers the
/// fan-out rules: arrays get length/index coupling, maps get key-iteration
/// fan-out on value writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A plain keyed object.
    Plain,
    /// An indexable sequence with an observable length.
    Array,
    /// A keyed collection whose iteration observes values.
    Map,
    /// A keyed collection whose iteration observes membership only.
    Set,
}

/// One observable property of a target.
///
/// The iteration keys are engine-reserved identities: reading "all of the
/// target" (iteration, size) tracks under [`Key::Iterate`], reading a map's
/// key set alone tracks under [`Key::MapKeyIterate`]. They are otherwise
/// ordinary keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named property.
    Prop(Cow<'static, str>),
    /// An array index.
    Index(usize),
    /// An array's length.
    Length,
    /// Iteration over the target's entries or size.
    Iterate,
    /// Iteration over a map's keys only.
    MapKeyIterate,
}

impl Key {
    /// A named-property key.
    pub fn prop(name: impl Into<Cow<'static, str>>) -> Self {
        Key::Prop(name.into())
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::Prop(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Prop(Cow::Owned(name))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// The kind of read being reported to [`track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackOp {
    /// A property read.
    Get,
    /// A membership test.
    Has,
    /// An iteration.
    Iterate,
}

/// The kind of mutation being reported to [`trigger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerOp {
    /// An existing property changed value.
    Set,
    /// A property was added.
    Add,
    /// A property was removed.
    Delete,
    /// The whole collection was emptied.
    Clear,
}

// Per-target registry entry: the shape plus the key → subscriber-set index,
// in key-creation order (fan-out preserves it).
pub(crate) struct TargetState {
    pub(crate) kind: TargetKind,
    pub(crate) keys: FxIndexMap<Key, DepId>,
}

/// A tracked target: one observed object of the external value layer.
///
/// The value layer registers each object it wraps with [`register_target`]
/// and reports reads and writes against the returned handle; it calls
/// [`dispose`](Target::dispose) when the object is torn down, which drops
/// the target's subscriber sets. Handles are plain copyable ids; a disposed
/// target's handle is inert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub(crate) id: TargetId,
}

impl Target {
    /// Whether this target is still registered.
    pub fn is_registered(&self) -> bool {
        with_runtime(|runtime| {
            runtime.targets.borrow().contains_key(self.id)
        })
    }

    /// The shape this target was registered with.
    pub fn kind(&self) -> Option<TargetKind> {
        with_runtime(|runtime| {
            runtime.targets.borrow().get(self.id).map(|state| state.kind)
        })
    }

    /// Unregisters the target and drops every subscriber set under it.
    ///
    /// The value layer calls this when the observed object is torn down, so
    /// the registry never outlives the objects it indexes.
    pub fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_target(self.id))
    }
}

/// Registers an observed object and returns its tracking handle.
pub fn register_target(kind: TargetKind) -> Target {
    with_runtime(|runtime| Target {
        id: runtime.targets.borrow_mut().insert(TargetState {
            kind,
            keys: FxIndexMap::default(),
        }),
    })
}

/// Reports a read of `key` on `target`.
///
/// If an effect is currently running and tracking is not paused, the effect
/// subscribes to the `(target, key)` pair and will be re-run by a matching
/// [`trigger`]. Otherwise this is a no-op.
#[cfg_attr(
    debug_assertions,
    tracing::instrument(level = "trace", skip_all, fields(target = ?target.id))
)]
pub fn track(target: Target, op: TrackOp, key: Key) {
    with_runtime(|runtime| runtime.track(target, op, key))
}

/// Reports a mutation of `target` and re-runs every effect that read what
/// changed.
///
/// `key` is the mutated property; `None` is meaningful only for
/// [`TriggerOp::Clear`], which invalidates every key of the target.
/// `new_length` accompanies a [`TriggerOp::Set`] of [`Key::Length`] on an
/// array-shaped target, where truncation also invalidates every index at or
/// past the new length; it is ignored otherwise.
///
/// Effects re-run synchronously, computed-backed effects before plain ones,
/// unless they carry a scheduler.
#[cfg_attr(
    debug_assertions,
    tracing::instrument(level = "trace", skip_all, fields(target = ?target.id, op = ?op))
)]
pub fn trigger(
    target: Target,
    op: TriggerOp,
    key: Option<Key>,
    new_length: Option<usize>,
) {
    with_runtime(|runtime| runtime.trigger(target, op, key, new_length))
}

/// Looks up the subscriber set for a property, if one has ever been
/// tracked.
pub fn get_dep(target: Target, key: &Key) -> Option<Dep> {
    with_runtime(|runtime| {
        runtime
            .targets
            .borrow()
            .get(target.id)
            .and_then(|state| state.keys.get(key).copied())
            .map(|id| Dep { id })
    })
}
