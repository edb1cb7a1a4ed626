//! Reactive Runtime
//!
//! The runtime connects reactive aggregates to the effects that read them.
//! Each raw object or array owns a table of [`Dep`]s, one per key that has
//! ever been read under tracking, plus the iteration and length slots.
//!
//! # How It Works
//!
//! 1. When a wrapper reads a key inside a running effect, the runtime looks
//!    up (or creates) the dep for that key and subscribes the effect.
//!
//! 2. When a wrapper writes, the runtime collects every dep the write can
//!    affect:
//!    a. The written key itself
//!    b. The iteration slot, when an object gains or loses a key
//!    c. The length slot, when an array grows
//!    d. Every index past the new end, when an array shrinks
//!
//! 3. The collected deps are triggered together, so an effect subscribed to
//!    several of them still runs once.
//!
//! Deps are only created while tracking, so untracked reads leave no trace.

use std::cell::RefCell;
use std::collections::HashMap;

use smallvec::SmallVec;

use super::context::{self, ReactiveContext};
use super::dep::{Dep, DepKey, TrackOp, TriggerOp};
use super::effect::trigger_deps;
use super::subscriber::SubscriberId;
use super::value::{PropKey, Target};

/// Per-target table of dependency sets.
#[derive(Default)]
pub(crate) struct KeyedDeps {
    deps: RefCell<HashMap<DepKey, Dep>>,
}

impl KeyedDeps {
    fn dep_for(&self, key: DepKey) -> Dep {
        self.deps
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| Dep::keyed(key))
            .clone()
    }

    fn get(&self, key: &DepKey) -> Option<Dep> {
        self.deps.borrow().get(key).cloned()
    }

    fn all(&self) -> Vec<Dep> {
        self.deps.borrow().values().cloned().collect()
    }

    fn indices_from(&self, start: usize) -> Vec<Dep> {
        self.deps
            .borrow()
            .iter()
            .filter(|(key, _)| matches!(key, DepKey::Prop(PropKey::Index(i)) if *i >= start))
            .map(|(_, dep)| dep.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.deps.borrow().len()
    }
}

type Collected = SmallVec<[Dep; 4]>;

/// Coordinator between raw targets and their dependency tables.
pub struct Runtime;

impl Runtime {
    /// Subscribe the running effect to `key` of `target`.
    pub(crate) fn track(target: &Target, op: TrackOp, key: DepKey) {
        if !context::is_tracking() {
            return;
        }
        target.deps().dep_for(key).track(op);
    }

    /// Notify effects affected by a write to a single key.
    pub(crate) fn trigger(target: &Target, op: TriggerOp, key: PropKey) {
        let deps = target.deps();
        let mut collected = Collected::new();

        let dep_key = DepKey::Prop(key);
        collected.extend(deps.get(&dep_key));

        match (op, target.is_array()) {
            (TriggerOp::Add, true) => collected.extend(deps.get(&DepKey::Prop(PropKey::Length))),
            (TriggerOp::Add | TriggerOp::Delete, false) => {
                collected.extend(deps.get(&DepKey::Iterate))
            }
            _ => {}
        }

        Self::notify(&collected, op, &dep_key);
    }

    /// Notify effects affected by an array being cut or padded to `new_len`.
    pub(crate) fn trigger_length(target: &Target, new_len: usize) {
        let deps = target.deps();
        let mut collected: Collected = deps.indices_from(new_len).into_iter().collect();
        collected.extend(deps.get(&DepKey::Prop(PropKey::Length)));

        Self::notify(&collected, TriggerOp::Set, &DepKey::Prop(PropKey::Length));
    }

    /// Notify effects affected by elements shifting from `start` onwards.
    pub(crate) fn trigger_shift(target: &Target, start: usize) {
        let deps = target.deps();
        let mut collected: Collected = deps.indices_from(start).into_iter().collect();
        collected.extend(deps.get(&DepKey::Prop(PropKey::Length)));

        Self::notify(&collected, TriggerOp::Set, &DepKey::Prop(PropKey::Index(start)));
    }

    /// Notify every effect that depends on any key of `target`.
    pub(crate) fn trigger_clear(target: &Target) {
        let collected: Collected = target.deps().all().into_iter().collect();
        Self::notify(&collected, TriggerOp::Clear, &DepKey::Iterate);
    }

    fn notify(deps: &[Dep], op: TriggerOp, key: &DepKey) {
        if deps.is_empty() {
            return;
        }
        tracing::trace!(?op, ?key, deps = deps.len(), "trigger");
        trigger_deps(deps, op, key);
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check whether a read right now would be tracked.
    pub fn is_tracking() -> bool {
        context::is_tracking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::value::{Array, Object};
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_reader(
        target: &Target,
        key: DepKey,
        op: TrackOp,
    ) -> (crate::reactive::Effect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let target = target.clone();
        let runner = effect(move || {
            Runtime::track(&target, op, key.clone());
            counter.set(counter.get() + 1);
        });
        (runner, runs)
    }

    #[test]
    fn untracked_reads_create_no_deps() {
        let target = Target::Object(Object::new());
        Runtime::track(&target, TrackOp::Get, DepKey::Prop("a".into()));
        assert_eq!(target.deps().len(), 0);
        assert!(!Runtime::is_tracking());
    }

    #[test]
    fn set_triggers_only_the_written_key() {
        let target = Target::Object(Object::new());
        let (_a, a_runs) = counting_reader(&target, DepKey::Prop("a".into()), TrackOp::Get);
        let (_b, b_runs) = counting_reader(&target, DepKey::Prop("b".into()), TrackOp::Get);

        Runtime::trigger(&target, TriggerOp::Set, "a".into());
        assert_eq!(a_runs.get(), 2);
        assert_eq!(b_runs.get(), 1);
    }

    #[test]
    fn adding_an_object_key_triggers_iteration() {
        let target = Target::Object(Object::new());
        let (_keys, runs) = counting_reader(&target, DepKey::Iterate, TrackOp::Iterate);

        Runtime::trigger(&target, TriggerOp::Set, "a".into());
        assert_eq!(runs.get(), 1);
        Runtime::trigger(&target, TriggerOp::Add, "a".into());
        assert_eq!(runs.get(), 2);
        Runtime::trigger(&target, TriggerOp::Delete, "a".into());
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn array_append_triggers_length() {
        let target = Target::Array(Array::new());
        let (_len, runs) =
            counting_reader(&target, DepKey::Prop(PropKey::Length), TrackOp::Get);

        Runtime::trigger(&target, TriggerOp::Add, PropKey::Index(0));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn shrinking_triggers_indices_past_the_end() {
        let target = Target::Array([1, 2, 3].into_iter().collect());
        let (_first, first_runs) =
            counting_reader(&target, DepKey::Prop(PropKey::Index(0)), TrackOp::Get);
        let (_last, last_runs) =
            counting_reader(&target, DepKey::Prop(PropKey::Index(2)), TrackOp::Get);

        Runtime::trigger_length(&target, 1);
        assert_eq!(first_runs.get(), 1);
        assert_eq!(last_runs.get(), 2);
    }

    #[test]
    fn shared_subscriber_runs_once_per_write() {
        let target = Target::Object(Object::new());
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let reader = target.clone();
        let _runner = effect(move || {
            Runtime::track(&reader, TrackOp::Get, DepKey::Prop("a".into()));
            Runtime::track(&reader, TrackOp::Iterate, DepKey::Iterate);
            counter.set(counter.get() + 1);
        });

        Runtime::trigger(&target, TriggerOp::Add, "a".into());
        assert_eq!(runs.get(), 2);
    }
}
