//! Effect Implementation
//!
//! An Effect is a re-runnable computation that records which dependency
//! sets it read during its last run.
//!
//! # How Effects Work
//!
//! 1. When created (unless lazy), the effect runs its function immediately
//!    to establish initial dependencies.
//!
//! 2. Every tracked read during a run links the effect and the [`Dep`] in
//!    both directions. Links carry the epoch of the run that last refreshed
//!    them; links that a run did not refresh are pruned when it finishes, so
//!    conditional reads never leave stale subscriptions behind.
//!
//! 3. When a dependency is triggered, the effect either re-runs inline
//!    (eager mode) or calls its scheduler (deferred mode). A renderer uses
//!    the scheduler to push an update job onto the job queue instead.
//!
//! # Stopping
//!
//! [`Effect::stop`] unlinks the effect from every dep and marks it inactive.
//! Stopping the effect that is currently running is deferred until its run
//! completes, so the tracking stack is never mutated mid-run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::{self, ReactiveContext};
use super::dep::{Dep, DepId, DepKey, Subscribers, TrackOp, TriggerOp};
use super::scope::{EffectScope, ScopeInner};
use super::SubscriberId;
use crate::error::{report, ReactiveError};

/// What a debugger hook is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerOp {
    /// The effect subscribed to a new dep.
    Track(TrackOp),
    /// A dep the effect subscribes to was triggered.
    Trigger(TriggerOp),
}

/// Event passed to `on_track` / `on_trigger` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerEvent {
    /// The effect the event concerns.
    pub effect: SubscriberId,
    /// The operation that happened.
    pub op: DebuggerOp,
    /// The slot that was read or written.
    pub key: DepKey,
}

type Hook = Rc<dyn Fn(&DebuggerEvent)>;

/// Options for [`effect_with`] and [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    lazy: bool,
    allow_recurse: bool,
    scheduler: Option<Rc<dyn Fn()>>,
    scope: Option<Rc<ScopeInner>>,
    on_stop: Option<Box<dyn FnOnce()>>,
    on_track: Option<Hook>,
    on_trigger: Option<Hook>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not run the effect on creation.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Allow the effect to be triggered by its own writes.
    ///
    /// Only meaningful with a scheduler: an eager effect cannot re-enter
    /// its own run.
    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    /// Call `scheduler` instead of re-running when a dependency changes.
    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Register the effect with `scope` instead of the active scope.
    pub fn scope(mut self, scope: &EffectScope) -> Self {
        self.scope = Some(Rc::clone(scope.inner()));
        self
    }

    /// Called once, when the effect is stopped.
    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.on_stop = Some(Box::new(on_stop));
        self
    }

    /// Called whenever the effect subscribes to a new dep.
    pub fn on_track<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DebuggerEvent) + 'static,
    {
        self.on_track = Some(Rc::new(hook));
        self
    }

    /// Called whenever a dep the effect subscribes to is triggered.
    pub fn on_trigger<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DebuggerEvent) + 'static,
    {
        self.on_trigger = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("allow_recurse", &self.allow_recurse)
            .field("scheduler", &self.scheduler.is_some())
            .field("scope", &self.scope.is_some())
            .finish()
    }
}

struct Link {
    dep: Dep,
    epoch: u64,
}

/// Shared state of an effect.
pub(crate) struct EffectInner {
    id: SubscriberId,
    func: RefCell<Box<dyn FnMut()>>,
    active: Cell<bool>,
    running: Cell<bool>,
    defer_stop: Cell<bool>,
    computed: bool,
    allow_recurse: bool,
    scheduler: Option<Rc<dyn Fn()>>,
    epoch: Cell<u64>,
    deps: RefCell<IndexMap<DepId, Link>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    on_track: Option<Hook>,
    on_trigger: Option<Hook>,
    run_count: Cell<usize>,
}

impl EffectInner {
    /// Build an effect without running it and record it in a scope.
    pub(crate) fn new(func: Box<dyn FnMut()>, options: EffectOptions, computed: bool) -> Rc<Self> {
        let EffectOptions {
            allow_recurse,
            scheduler,
            scope,
            on_stop,
            on_track,
            on_trigger,
            ..
        } = options;

        let effect = Rc::new(Self {
            id: SubscriberId::new(),
            func: RefCell::new(func),
            active: Cell::new(true),
            running: Cell::new(false),
            defer_stop: Cell::new(false),
            computed,
            allow_recurse,
            scheduler,
            epoch: Cell::new(0),
            deps: RefCell::new(IndexMap::new()),
            on_stop: RefCell::new(on_stop),
            on_track,
            on_trigger,
            run_count: Cell::new(0),
        });

        if let Some(scope) = scope.or_else(context::active_scope) {
            scope.record_effect(&effect);
        }

        effect
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Run the computation, tracking what it reads.
    pub(crate) fn run(self: &Rc<Self>) {
        if !self.active.get() {
            // Stopped effects still execute on demand, but subscribe nothing.
            if let Ok(mut func) = self.func.try_borrow_mut() {
                let func: &mut dyn FnMut() = &mut **func;
                context::untracked(func);
            }
            return;
        }

        if self.running.get() {
            report(&ReactiveError::CyclicDependency { effect: self.id });
            return;
        }

        let Ok(mut func) = self.func.try_borrow_mut() else {
            report(&ReactiveError::CyclicDependency { effect: self.id });
            return;
        };

        let _run = EffectRun::begin(self);
        let func: &mut dyn FnMut() = &mut **func;
        func();
    }

    /// Subscribe to `dep`, or refresh the existing link for this run.
    pub(crate) fn link(self: &Rc<Self>, dep: &Dep, op: TrackOp) {
        let epoch = self.epoch.get();
        let is_new = {
            let mut deps = self.deps.borrow_mut();
            match deps.get_mut(&dep.id()) {
                Some(link) => {
                    link.epoch = epoch;
                    false
                }
                None => {
                    deps.insert(
                        dep.id(),
                        Link {
                            dep: dep.clone(),
                            epoch,
                        },
                    );
                    true
                }
            }
        };

        if is_new {
            dep.subscribe(self);
            if let Some(hook) = &self.on_track {
                hook(&DebuggerEvent {
                    effect: self.id,
                    op: DebuggerOp::Track(op),
                    key: dep.key().clone(),
                });
            }
        }
    }

    fn prune_stale(&self) {
        let epoch = self.epoch.get();
        let mut stale: SmallVec<[Dep; 4]> = SmallVec::new();
        self.deps.borrow_mut().retain(|_, link| {
            if link.epoch == epoch {
                true
            } else {
                stale.push(link.dep.clone());
                false
            }
        });
        for dep in stale {
            dep.unsubscribe(self.id);
        }
    }

    pub(crate) fn stop(&self) {
        if self.running.get() {
            self.defer_stop.set(true);
            return;
        }
        if !self.active.replace(false) {
            return;
        }

        let links = std::mem::take(&mut *self.deps.borrow_mut());
        for (_, link) in links {
            link.dep.unsubscribe(self.id);
        }

        let on_stop = self.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
        tracing::trace!(effect = %self.id, "effect stopped");
    }

    fn notify(self: &Rc<Self>, op: TriggerOp, key: &DepKey) {
        if !self.active.get() || self.defer_stop.get() {
            return;
        }
        if !self.allow_recurse && ReactiveContext::is_current(self.id) {
            return;
        }

        if let Some(hook) = &self.on_trigger {
            hook(&DebuggerEvent {
                effect: self.id,
                op: DebuggerOp::Trigger(op),
                key: key.clone(),
            });
        }

        match &self.scheduler {
            Some(scheduler) => scheduler(),
            None => self.run(),
        }
    }
}

/// Bookkeeping for one in-progress run. Dropping it (normally or while
/// unwinding) prunes stale links and pops the context.
struct EffectRun<'a> {
    effect: &'a Rc<EffectInner>,
    context: Option<ReactiveContext>,
}

impl<'a> EffectRun<'a> {
    fn begin(effect: &'a Rc<EffectInner>) -> Self {
        effect.running.set(true);
        effect.epoch.set(effect.epoch.get() + 1);
        effect.run_count.set(effect.run_count.get() + 1);
        Self {
            effect,
            context: Some(ReactiveContext::enter(effect)),
        }
    }
}

impl Drop for EffectRun<'_> {
    fn drop(&mut self) {
        self.context.take();
        self.effect.prune_stale();
        self.effect.running.set(false);
        if self.effect.defer_stop.replace(false) {
            self.effect.stop();
        }
    }
}

/// Notify a snapshot of subscribers. Computed invalidations go first so that
/// plain effects triggered by the same write observe fresh derived values.
/// A plain effect that already ran through a computed in this pass is not
/// run again.
pub(crate) fn trigger_effects<I>(subscribers: I, op: TriggerOp, key: &DepKey)
where
    I: IntoIterator<Item = Rc<EffectInner>>,
{
    let subscribers: Subscribers = subscribers.into_iter().collect();
    let runs_before: SmallVec<[usize; 8]> = subscribers
        .iter()
        .map(|effect| effect.run_count.get())
        .collect();

    for effect in subscribers.iter().filter(|effect| effect.computed) {
        effect.notify(op, key);
    }
    for (effect, before) in subscribers.iter().zip(runs_before) {
        if effect.computed || effect.run_count.get() != before {
            continue;
        }
        effect.notify(op, key);
    }
}

/// Trigger several deps at once, running each subscriber at most once.
pub(crate) fn trigger_deps(deps: &[Dep], op: TriggerOp, key: &DepKey) {
    let mut unique: IndexMap<SubscriberId, Rc<EffectInner>> = IndexMap::new();
    for dep in deps {
        for effect in dep.snapshot() {
            unique.entry(effect.id()).or_insert(effect);
        }
    }
    trigger_effects(unique.into_values(), op, key);
}

/// Handle to a tracked effect.
///
/// Clones share the same effect. Dropping a handle does not stop the
/// effect: it stays subscribed until [`Effect::stop`] is called or its
/// owning scope is stopped.
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately.
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(run, EffectOptions::new())
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(run, EffectOptions::new().lazy())
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(run: F, options: EffectOptions) -> Self
    where
        F: FnMut() + 'static,
    {
        let lazy = options.lazy;
        let inner = EffectInner::new(Box::new(run), options, false);
        if !lazy {
            inner.run();
        }
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }

    /// Get the effect's subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Run the effect now, re-collecting its dependencies.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Unsubscribe from everything and never react again.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Number of tracked runs so far.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of deps the effect currently subscribes to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Create an effect and run it immediately.
pub fn effect<F>(run: F) -> Effect
where
    F: FnMut() + 'static,
{
    Effect::new(run)
}

/// Create an effect with explicit options.
pub fn effect_with<F>(run: F, options: EffectOptions) -> Effect
where
    F: FnMut() + 'static,
{
    Effect::with_options(run, options)
}

/// Stop `effect`.
pub fn stop(effect: &Effect) {
    effect.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{clear_error_handler, set_error_handler};
    use crate::reactive::Ref;

    fn counter() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn effect_runs_on_creation() {
        let runs = counter();
        let count = runs.clone();

        let _effect = Effect::new(move || count.set(count.get() + 1));

        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let runs = counter();
        let count = runs.clone();

        let effect = Effect::new_lazy(move || count.set(count.get() + 1));
        assert_eq!(runs.get(), 0);
        assert_eq!(effect.run_count(), 0);

        effect.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let source = Ref::new(1);
        let seen = counter();

        let reader = source.clone();
        let sink = seen.clone();
        let _effect = effect(move || sink.set(reader.get()));

        source.set(2);
        assert_eq!(seen.get(), 2);
        source.set(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn conditional_reads_are_pruned() {
        let flag = Ref::new(true);
        let a = Ref::new(0);
        let runs = counter();

        let (f, r, count) = (flag.clone(), a.clone(), runs.clone());
        let runner = effect(move || {
            count.set(count.get() + 1);
            if f.get() {
                r.get();
            }
        });
        assert_eq!(runner.dependency_count(), 2);

        flag.set(false);
        assert_eq!(runs.get(), 2);
        assert_eq!(runner.dependency_count(), 1);

        // No longer read, so no longer subscribed.
        a.set(5);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_does_not_run_after_stop() {
        let source = Ref::new(0);
        let runs = counter();

        let (reader, count) = (source.clone(), runs.clone());
        let runner = effect(move || {
            reader.get();
            count.set(count.get() + 1);
        });

        stop(&runner);
        assert!(!runner.is_active());
        assert_eq!(runner.dependency_count(), 0);
        assert_eq!(source.subscriber_count(), 0);

        source.set(1);
        source.set(2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stop_inside_own_run_is_deferred() {
        let source = Ref::new(0);
        let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let (reader, me) = (source.clone(), slot.clone());
        let runner = effect(move || {
            if reader.get() > 0 {
                if let Some(me) = me.borrow().as_ref() {
                    me.stop();
                    // Still running, so still active until the run completes.
                    assert!(me.is_active());
                }
            }
        });
        *slot.borrow_mut() = Some(runner.clone());

        source.set(1);
        assert!(!runner.is_active());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn source_and_derived_reader_runs_once_per_write() {
        let source = Ref::new(1);
        let reader = source.clone();
        let doubled = crate::reactive::computed(move || reader.get() * 2);
        let runs = counter();
        let seen = counter();

        let (src, derived, count, sink) =
            (source.clone(), doubled.clone(), runs.clone(), seen.clone());
        let _runner = effect(move || {
            src.get();
            sink.set(derived.get() as usize);
            count.set(count.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        source.set(2);
        assert_eq!(runs.get(), 2);
        assert_eq!(seen.get(), 4);

        source.set(3);
        assert_eq!(runs.get(), 3);
        assert_eq!(seen.get(), 6);
    }

    #[test]
    fn own_writes_do_not_retrigger() {
        let source = Ref::new(0);
        let runs = counter();

        let (cell, count) = (source.clone(), runs.clone());
        let _runner = effect(move || {
            count.set(count.get() + 1);
            cell.set(cell.get() + 1);
        });

        assert_eq!(runs.get(), 1);
        assert_eq!(source.get_untracked(), 1);
    }

    #[test]
    fn nested_effects_track_independently() {
        let outer_src = Ref::new(0);
        let inner_src = Ref::new(0);
        let outer_runs = counter();
        let inner_runs = counter();
        let inner_effect: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let (o, i, oc, ic, slot) = (
            outer_src.clone(),
            inner_src.clone(),
            outer_runs.clone(),
            inner_runs.clone(),
            inner_effect.clone(),
        );
        let _outer = effect(move || {
            oc.set(oc.get() + 1);
            o.get();
            if slot.borrow().is_none() {
                let (i, ic) = (i.clone(), ic.clone());
                let child = effect(move || {
                    ic.set(ic.get() + 1);
                    i.get();
                });
                *slot.borrow_mut() = Some(child);
            }
        });

        inner_src.set(1);
        assert_eq!(outer_runs.get(), 1);
        assert_eq!(inner_runs.get(), 2);

        outer_src.set(1);
        assert_eq!(outer_runs.get(), 2);
        assert_eq!(inner_runs.get(), 2);
    }

    #[test]
    fn scheduler_replaces_rerun() {
        let source = Ref::new(0);
        let runs = counter();
        let scheduled = counter();

        let (reader, count, sched) = (source.clone(), runs.clone(), scheduled.clone());
        let runner = effect_with(
            move || {
                reader.get();
                count.set(count.get() + 1);
            },
            EffectOptions::new().scheduler(move || sched.set(sched.get() + 1)),
        );

        source.set(1);
        source.set(2);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 2);

        runner.run();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn on_stop_runs_once() {
        let stops = counter();
        let count = stops.clone();
        let runner = effect_with(|| {}, EffectOptions::new().on_stop(move || count.set(count.get() + 1)));

        runner.stop();
        runner.stop();
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn debugger_hooks_report_track_and_trigger() {
        let source = Ref::new(0);
        let events = Rc::new(RefCell::new(Vec::new()));

        let (reader, tracked, triggered) = (source.clone(), events.clone(), events.clone());
        let _runner = effect_with(
            move || {
                reader.get();
            },
            EffectOptions::new()
                .on_track(move |e| tracked.borrow_mut().push(e.op))
                .on_trigger(move |e| triggered.borrow_mut().push(e.op)),
        );
        source.set(3);

        assert_eq!(
            *events.borrow(),
            vec![
                DebuggerOp::Track(TrackOp::Get),
                DebuggerOp::Trigger(TriggerOp::Set),
            ]
        );
    }

    #[test]
    fn reentrant_run_is_reported_and_skipped() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        set_error_handler(move |err| sink.borrow_mut().push(err.clone()));

        let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let runs = counter();
        let (me, count) = (slot.clone(), runs.clone());
        let runner = Effect::new_lazy(move || {
            count.set(count.get() + 1);
            if let Some(me) = me.borrow().as_ref() {
                me.run();
            }
        });
        *slot.borrow_mut() = Some(runner.clone());

        runner.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(
            *errors.borrow(),
            vec![ReactiveError::CyclicDependency { effect: runner.id() }]
        );
        clear_error_handler();
    }

    #[test]
    fn panicking_run_leaves_context_clean() {
        let source = Ref::new(0);
        let reader = source.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            effect(move || {
                reader.get();
                panic!("computation failed");
            })
        }));

        assert!(result.is_err());
        assert!(!ReactiveContext::is_active());
        assert!(context::should_track());
    }
}
