//! Reactive Primitives
//!
//! This module implements the core reactive system: refs, reactive
//! wrappers, computed values, effects, and effect scopes.
//!
//! # Concepts
//!
//! ## Refs
//!
//! A [`Ref`] is a container for a single mutable value. When a ref is read
//! within a running effect, the ref registers that effect as a subscriber.
//! When the ref's value changes, all subscribers are notified.
//!
//! ## Reactive Wrappers
//!
//! A [`Reactive`] wraps an object or array [`Value`] and tracks each
//! property separately, so an effect that reads `user.name` is not re-run
//! when `user.age` changes. Readonly and shallow flavors refuse writes and
//! skip deep wrapping respectively.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed and somebody reads it.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever its
//! dependencies change, either inline or through a scheduler.
//!
//! ## Scopes
//!
//! An [`EffectScope`] collects effects created while it runs, so they can be
//! disposed of together.
//!
//! # Implementation Notes
//!
//! All reactive state is thread-local and built on `Rc`/`RefCell`. Reads
//! find the running effect on a thread-local stack and link it to the
//! [`Dep`] of the slot being read; writes trigger the dep's subscribers.

mod computed;
mod context;
mod dep;
mod effect;
mod proxy;
mod refs;
mod runtime;
mod scope;
mod subscriber;
mod value;

pub use computed::{computed, writable_computed, Computed};
pub use context::{
    enable_tracking, is_tracking, pause_tracking, reset_tracking, should_track, untracked,
    ReactiveContext,
};
pub use dep::{Dep, DepKey, TrackOp, TriggerOp};
pub(crate) use effect::EffectInner;
pub use effect::{effect, effect_with, stop, DebuggerEvent, DebuggerOp, Effect, EffectOptions};
pub use proxy::{
    is_proxy, is_reactive, is_readonly, is_shallow, reactive, readonly, shallow_reactive,
    shallow_readonly, to_raw, to_reactive, to_readonly, Reactive, Source,
};
pub use refs::{is_ref, reactive_ref, trigger_ref, unref, Ref};
pub use runtime::Runtime;
pub use scope::{effect_scope, get_current_scope, on_scope_dispose, EffectScope};
pub use subscriber::SubscriberId;
pub use value::{Array, Object, PropKey, Value, MAX_ARRAY_LENGTH};
