#![forbid(unsafe_code)]

//! Property-level dependency tracking and effect invalidation for
//! fine-grained reactive systems.
//!
//! ## Fine-Grained Reactivity
//!
//! A fine-grained reactive system has two halves: observable values, which
//! change over time, and *effects* (sometimes known as observers), which
//! re-run whenever a value they read changes. This crate implements the
//! engine that connects the two halves without owning either: an external
//! value layer (a proxy, a store, a `ref`-style cell) reports *reads* and
//! *writes* of `(target, key)` pairs, and the engine works out exactly which
//! effects read what, and re-runs exactly those effects when a write lands.
//!
//! The engine re-learns an effect's dependencies on every run, so an effect
//! that reads different properties on different runs (say, behind an
//! `if`) always subscribes to precisely what its *last* run read. The
//! reconciliation uses per-dependency recursion-depth bitmasks, so a re-run
//! whose dependencies did not change costs only bit flips rather than
//! tearing down and rebuilding every subscription.
//!
//! ### The two entry points
//!
//! 1. On every read, the value layer calls [`track`] with the operation
//!    ([`TrackOp`]) and the [`Key`] that was read. If an effect is
//!    currently running, it becomes a subscriber of that `(target, key)`
//!    pair.
//! 2. On every write, the value layer calls [`trigger`] with the mutation
//!    kind ([`TriggerOp`]). The engine selects the affected subscriber sets
//!    (including iteration and array-length fan-out) and re-runs their
//!    effects, computed-backed effects first.
//!
//! ### Example
//! ```
//! use reactive_effects::*;
//! use std::{cell::Cell, rc::Rc};
//!
//! // the value layer: one tracked object with one property
//! let obj = register_target(TargetKind::Plain);
//! let value = Rc::new(Cell::new(1));
//!
//! let seen = Rc::new(Cell::new(0));
//! let effect = create_effect({
//!     let value = Rc::clone(&value);
//!     let seen = Rc::clone(&seen);
//!     move || {
//!         // a read: report it, then observe the value
//!         track(obj, TrackOp::Get, Key::prop("count"));
//!         seen.set(value.get());
//!     }
//! });
//! assert_eq!(seen.get(), 1);
//!
//! // a write: update the value, then report it
//! value.set(2);
//! trigger(obj, TriggerOp::Set, Some(Key::prop("count")), None);
//! assert_eq!(seen.get(), 2);
//!
//! effect.stop();
//! ```
//!
//! ### Scopes
//!
//! Effects created while an [`EffectScope`] is active are owned by that
//! scope, and [`EffectScope::stop`] disposes all of them, plus any
//! [`on_scope_dispose`] cleanups and child scopes, in one call. A scope is
//! the unit of bulk teardown for a component, a route, a list row.
//!
//! ### Threading
//!
//! The engine keeps its entire state in a per-thread runtime; every handle
//! resolves against the runtime of the thread it is used on. There is no
//! cross-thread sharing: each thread is its own reactive world.

mod dep;
mod diagnostics;
mod effect;
mod registry;
mod runtime;
mod scope;

pub use dep::{Dep, DepId};
pub use diagnostics::{TrackEvent, TriggerEvent};
pub use effect::{
    create_effect, create_effect_with, enable_tracking, pause_tracking,
    reset_tracking, stop, untracked, Effect, EffectId, EffectOptions,
};
pub use registry::{
    get_dep, register_target, track, trigger, Key, Target, TargetId,
    TargetKind, TrackOp, TriggerOp,
};
pub use scope::{
    create_effect_scope, get_current_scope, on_scope_dispose,
    record_effect_scope, try_on_scope_dispose, EffectScope, ScopeError,
    ScopeId,
};

#[doc(hidden)]
#[macro_export]
macro_rules! debug_warn {
    ($($x:tt)*) => {
        {
            #[cfg(debug_assertions)]
            {
                ::tracing::warn!($($x)*)
            }
            #[cfg(not(debug_assertions))]
            { }
        }
    }
}
