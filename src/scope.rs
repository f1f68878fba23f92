#![forbid(unsafe_code)]

use crate::{
    effect::{Effect, EffectId},
    runtime::with_runtime,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

slotmap::new_key_type! {
    /// Unique ID assigned to an [`EffectScope`].
    pub struct ScopeId;
}

/// Errors returned by the fallible scope operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    /// The scope has already been stopped.
    #[error("the effect scope has already been stopped")]
    Stopped,
    /// No effect scope is active on this thread.
    #[error("no effect scope is active")]
    NoActiveScope,
}

// Per-scope bookkeeping. `index_in_parent` is this scope's slot in its
// parent's `children`, kept in sync across swap-removal so that detaching
// any child is O(1); it is meaningful only while `parent` is set.
pub(crate) struct ScopeState {
    pub(crate) active: bool,
    pub(crate) effects: Vec<EffectId>,
    pub(crate) cleanups: Vec<Box<dyn FnOnce()>>,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) index_in_parent: usize,
    pub(crate) detached: bool,
}

/// A lifetime container that owns effects and cleanup callbacks for bulk
/// disposal.
///
/// Effects created while a scope is active are owned by it;
/// [`stop`](EffectScope::stop) disposes all of them, runs every
/// [`on_scope_dispose`] cleanup in registration order, and cascades to
/// child scopes, in one call. Scopes nest: a scope created while another
/// scope is running becomes its child and dies with it, unless created
/// `detached`.
///
/// ```
/// use reactive_effects::*;
/// use std::{cell::Cell, rc::Rc};
///
/// let obj = register_target(TargetKind::Plain);
/// let runs = Rc::new(Cell::new(0));
///
/// let scope = create_effect_scope(false);
/// scope.run({
///     let runs = Rc::clone(&runs);
///     move || {
///         create_effect(move || {
///             track(obj, TrackOp::Get, Key::prop("x"));
///             runs.set(runs.get() + 1);
///         });
///     }
/// });
/// assert_eq!(runs.get(), 1);
///
/// scope.stop();
///
/// // the effect died with its scope
/// trigger(obj, TriggerOp::Set, Some(Key::prop("x")), None);
/// assert_eq!(runs.get(), 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EffectScope {
    pub(crate) id: ScopeId,
}

impl EffectScope {
    /// Runs the given function with this scope active, so that effects and
    /// cleanups created inside it are owned by this scope.
    ///
    /// On a stopped scope the function does not run: the call warns in
    /// debug builds and returns `None`.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        match self.try_run(f) {
            Ok(value) => Some(value),
            Err(_) => {
                crate::debug_warn!(
                    "cannot run an effect scope that has been stopped"
                );
                None
            }
        }
    }

    /// Like [`run`](EffectScope::run), but returns an error instead of
    /// warning when the scope has been stopped.
    pub fn try_run<T>(
        &self,
        f: impl FnOnce() -> T,
    ) -> Result<T, ScopeError> {
        with_runtime(|runtime| {
            let active = runtime
                .scopes
                .borrow()
                .get(self.id)
                .map(|s| s.active)
                .unwrap_or(false);
            if !active {
                return Err(ScopeError::Stopped);
            }
            let prev = runtime.active_scope.replace(Some(self.id));
            let _restore = RestoreScopeOnDrop { prev };
            Ok(f())
        })
    }

    /// Makes this scope the active one until [`exit`](EffectScope::exit).
    ///
    /// [`run`](EffectScope::run) is the usual entry point; this manual pair
    /// exists for callers that cannot wrap their work in one closure.
    #[doc(hidden)]
    pub fn enter(&self) {
        with_runtime(|runtime| runtime.active_scope.set(Some(self.id)))
    }

    /// Restores this scope's parent as the active scope.
    #[doc(hidden)]
    pub fn exit(&self) {
        with_runtime(|runtime| {
            let parent = runtime
                .scopes
                .borrow()
                .get(self.id)
                .and_then(|s| s.parent);
            runtime.active_scope.set(parent);
        })
    }

    /// Whether the scope has not been stopped.
    pub fn is_active(&self) -> bool {
        with_runtime(|runtime| {
            runtime
                .scopes
                .borrow()
                .get(self.id)
                .map(|s| s.active)
                .unwrap_or(false)
        })
    }

    /// Stops the scope: disposes every owned effect, runs every cleanup in
    /// registration order, stops every child scope, and detaches from the
    /// parent. Idempotent.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(
            level = "trace",
            name = "EffectScope::stop()",
            skip_all,
            fields(id = ?self.id)
        )
    )]
    pub fn stop(&self) {
        self.stop_inner(false)
    }

    fn stop_inner(&self, from_parent: bool) {
        // deactivate first: a cleanup that re-enters stop() is a no-op, and
        // nothing can register into the scope while it is being torn down
        let proceed = with_runtime(|runtime| {
            let mut scopes = runtime.scopes.borrow_mut();
            match scopes.get_mut(self.id) {
                Some(s) if s.active => {
                    s.active = false;
                    true
                }
                _ => false,
            }
        });
        if !proceed {
            return;
        }

        let effects = with_runtime(|runtime| {
            runtime
                .scopes
                .borrow_mut()
                .get_mut(self.id)
                .map(|s| std::mem::take(&mut s.effects))
                .unwrap_or_default()
        });
        for effect_id in effects {
            with_runtime(|runtime| runtime.dispose_effect(effect_id));
        }

        let cleanups = with_runtime(|runtime| {
            runtime
                .scopes
                .borrow_mut()
                .get_mut(self.id)
                .map(|s| std::mem::take(&mut s.cleanups))
                .unwrap_or_default()
        });
        for cleanup in cleanups {
            // a panicking cleanup must not starve the ones after it
            if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                tracing::error!(
                    "an effect scope cleanup panicked; running the \
                     remaining cleanups"
                );
            }
        }

        let children = with_runtime(|runtime| {
            runtime
                .scopes
                .borrow_mut()
                .get_mut(self.id)
                .map(|s| std::mem::take(&mut s.children))
                .unwrap_or_default()
        });
        for child in children {
            EffectScope { id: child }.stop_inner(true);
        }

        if !from_parent {
            self.detach_from_parent();
        }

        with_runtime(|runtime| {
            runtime.scopes.borrow_mut().remove(self.id);
        });
    }

    // O(1) removal from the parent's child list: swap the last child into
    // our slot and update its recorded index.
    fn detach_from_parent(&self) {
        with_runtime(|runtime| {
            let slot = {
                let scopes = runtime.scopes.borrow();
                scopes.get(self.id).and_then(|s| {
                    if s.detached {
                        None
                    } else {
                        s.parent.map(|parent| (parent, s.index_in_parent))
                    }
                })
            };
            let Some((parent_id, index)) = slot else {
                return;
            };
            let mut scopes = runtime.scopes.borrow_mut();
            let moved = match scopes.get_mut(parent_id) {
                Some(parent) => match parent.children.pop() {
                    Some(last) if last != self.id => {
                        parent.children[index] = last;
                        Some(last)
                    }
                    _ => None,
                },
                None => None,
            };
            if let Some(moved) = moved {
                if let Some(m) = scopes.get_mut(moved) {
                    m.index_in_parent = index;
                }
            }
        })
    }
}

struct RestoreScopeOnDrop {
    prev: Option<ScopeId>,
}

impl Drop for RestoreScopeOnDrop {
    fn drop(&mut self) {
        with_runtime(|runtime| runtime.active_scope.set(self.prev));
    }
}

/// Creates an effect scope.
///
/// A non-detached scope created while another scope is active becomes its
/// child and is stopped when the parent stops. A `detached` scope has no
/// parent link and must be stopped on its own.
pub fn create_effect_scope(detached: bool) -> EffectScope {
    with_runtime(|runtime| {
        let parent = if detached {
            None
        } else {
            runtime
                .active_scope
                .get()
                .filter(|id| runtime.scopes.borrow().contains_key(*id))
        };
        let id = runtime.scopes.borrow_mut().insert(ScopeState {
            active: true,
            effects: Vec::new(),
            cleanups: Vec::new(),
            parent,
            children: Vec::new(),
            index_in_parent: 0,
            detached,
        });
        if let Some(parent_id) = parent {
            let mut scopes = runtime.scopes.borrow_mut();
            let index = match scopes.get_mut(parent_id) {
                Some(p) => {
                    p.children.push(id);
                    p.children.len() - 1
                }
                None => 0,
            };
            if let Some(s) = scopes.get_mut(id) {
                s.index_in_parent = index;
            }
        }
        EffectScope { id }
    })
}

/// The scope currently active on this thread, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    with_runtime(|runtime| {
        runtime
            .active_scope
            .get()
            .filter(|id| runtime.scopes.borrow().contains_key(*id))
            .map(|id| EffectScope { id })
    })
}

/// Registers a cleanup on the currently active scope, to run when the scope
/// is stopped.
///
/// Cleanups run in registration order, after the scope's effects have been
/// disposed and before child scopes are stopped. With no active scope this
/// warns in debug builds and does nothing.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    if try_on_scope_dispose(f).is_err() {
        crate::debug_warn!(
            "on_scope_dispose() was called outside of an active effect scope"
        );
    }
}

/// Like [`on_scope_dispose`], but returns an error instead of warning when
/// no scope is active.
pub fn try_on_scope_dispose(
    f: impl FnOnce() + 'static,
) -> Result<(), ScopeError> {
    with_runtime(|runtime| {
        let Some(id) = runtime.active_scope.get() else {
            return Err(ScopeError::NoActiveScope);
        };
        let mut scopes = runtime.scopes.borrow_mut();
        match scopes.get_mut(id) {
            Some(s) if s.active => {
                s.cleanups.push(Box::new(f));
                Ok(())
            }
            _ => Err(ScopeError::Stopped),
        }
    })
}

/// Records an effect as owned by the given scope (or the currently active
/// one), so the scope's [`stop`](EffectScope::stop) disposes it.
///
/// [`create_effect`](crate::create_effect) already does this; the explicit
/// form exists for collaborators that build their effects by hand and
/// attach them afterwards. Recording into a stopped scope is a no-op.
pub fn record_effect_scope(effect: Effect, scope: Option<EffectScope>) {
    with_runtime(|runtime| {
        let scope_id = scope
            .map(|s| s.id)
            .or_else(|| runtime.active_scope.get());
        if let Some(scope_id) = scope_id {
            let mut scopes = runtime.scopes.borrow_mut();
            if let Some(s) = scopes.get_mut(scope_id) {
                if s.active {
                    s.effects.push(effect.id);
                }
            }
        }
    })
}
