#![forbid(unsafe_code)]

// Debug-build plumbing for the per-effect `on_track`/`on_trigger`
// callbacks. The context structs ferry the operation and key from the entry
// points down to the callback sites; in release builds they are empty and
// the callbacks are never invoked, so release code pays nothing for them.

use crate::{
    effect::Effect,
    registry::{Key, Target, TrackOp, TriggerOp},
};
use cfg_if::cfg_if;

/// Delivered to an effect's `on_track` callback whenever the effect gains a
/// subscription. Debug builds only; release builds never invoke the
/// callback.
#[derive(Clone, Debug)]
pub struct TrackEvent {
    /// The effect that subscribed.
    pub effect: Effect,
    /// The target that was read, if the read went through the registry.
    pub target: Option<Target>,
    /// The kind of read.
    pub op: TrackOp,
    /// The key that was read, if the read went through the registry.
    pub key: Option<Key>,
}

/// Delivered to an effect's `on_trigger` callback whenever a mutation
/// schedules the effect. Debug builds only; release builds never invoke the
/// callback.
#[derive(Clone, Debug)]
pub struct TriggerEvent {
    /// The effect being scheduled.
    pub effect: Effect,
    /// The target that was mutated, if the write went through the registry.
    pub target: Option<Target>,
    /// The kind of mutation.
    pub op: TriggerOp,
    /// The key that was mutated, if one was given.
    pub key: Option<Key>,
    /// The new length, for array truncation writes.
    pub new_length: Option<usize>,
}

cfg_if! {
    if #[cfg(debug_assertions)] {
        pub(crate) struct TrackContext {
            target: Option<Target>,
            op: TrackOp,
            key: Option<Key>,
        }

        pub(crate) struct TriggerContext {
            target: Option<Target>,
            op: TriggerOp,
            key: Option<Key>,
            new_length: Option<usize>,
        }

        impl TrackContext {
            pub(crate) fn new(
                target: Option<Target>,
                op: TrackOp,
                key: Option<&Key>,
            ) -> Self {
                Self {
                    target,
                    op,
                    key: key.cloned(),
                }
            }

            pub(crate) fn event(&self, effect: Effect) -> TrackEvent {
                TrackEvent {
                    effect,
                    target: self.target,
                    op: self.op,
                    key: self.key.clone(),
                }
            }
        }

        impl TriggerContext {
            pub(crate) fn new(
                target: Option<Target>,
                op: TriggerOp,
                key: Option<&Key>,
                new_length: Option<usize>,
            ) -> Self {
                Self {
                    target,
                    op,
                    key: key.cloned(),
                    new_length,
                }
            }

            pub(crate) fn event(&self, effect: Effect) -> TriggerEvent {
                TriggerEvent {
                    effect,
                    target: self.target,
                    op: self.op,
                    key: self.key.clone(),
                    new_length: self.new_length,
                }
            }
        }
    } else {
        pub(crate) struct TrackContext {}

        pub(crate) struct TriggerContext {}

        impl TrackContext {
            #[inline(always)]
            pub(crate) fn new(
                _target: Option<Target>,
                _op: TrackOp,
                _key: Option<&Key>,
            ) -> Self {
                Self {}
            }
        }

        impl TriggerContext {
            #[inline(always)]
            pub(crate) fn new(
                _target: Option<Target>,
                _op: TriggerOp,
                _key: Option<&Key>,
                _new_length: Option<usize>,
            ) -> Self {
                Self {}
            }
        }
    }
}
