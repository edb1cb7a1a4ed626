//! Computed Values
//!
//! A [`Computed`] caches the result of a getter and recomputes it lazily.
//!
//! # States
//!
//! - **Dirty**: a dependency changed since the last evaluation (or there
//!   has been none). The next read re-runs the getter.
//! - **Clean**: the cached value is current and reads return it.
//!
//! The getter runs inside an effect whose scheduler, instead of re-running,
//! marks the computed dirty and notifies the computed's own subscribers. A
//! chain of computeds therefore propagates dirtiness eagerly but evaluates
//! only when somebody reads the end of the chain.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::dep::{Dep, TrackOp, TriggerOp};
use super::effect::{EffectInner, EffectOptions};
use crate::error::{misuse, ReactiveError, Result};

/// A lazily evaluated, cached derived value.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    dep: Dep,
    effect: Rc<EffectInner>,
    setter: Option<Box<dyn Fn(T)>>,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
    }
}

/// Restores the dirty flag if the getter unwinds.
struct DirtyOnUnwind<'a>(&'a Cell<bool>);

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set(true);
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a readonly computed value.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Box::new(getter), None)
    }

    /// Create a computed value that forwards writes to `setter`.
    pub fn with_setter<G, S>(getter: G, setter: S) -> Self
    where
        G: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)))
    }

    fn build(getter: Box<dyn Fn() -> T>, setter: Option<Box<dyn Fn(T)>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let cache = weak.clone();
            let evaluate = move || {
                if let Some(inner) = cache.upgrade() {
                    let value = getter();
                    *inner.value.borrow_mut() = Some(value);
                }
            };

            let owner = weak.clone();
            let options = EffectOptions::new().lazy().scheduler(move || {
                if let Some(inner) = owner.upgrade() {
                    if !inner.dirty.replace(true) {
                        inner.dep.trigger(TriggerOp::Set);
                    }
                }
            });

            ComputedInner {
                value: RefCell::new(None),
                dirty: Cell::new(true),
                dep: Dep::new(),
                effect: EffectInner::new(Box::new(evaluate), options, true),
                setter,
            }
        });

        Self { inner }
    }

    /// Read the value, recomputing it first if it is dirty.
    ///
    /// Fails if the getter reads this computed while it is being evaluated.
    pub fn try_get(&self) -> Result<T> {
        let inner = &self.inner;
        let cyclic = || ReactiveError::CyclicDependency {
            effect: inner.effect.id(),
        };
        if inner.effect.is_running() {
            return Err(cyclic());
        }

        inner.dep.track(TrackOp::Get);
        if inner.dirty.get() {
            inner.dirty.set(false);
            let _restore = DirtyOnUnwind(&inner.dirty);
            inner.effect.run();
        }

        let cached = inner.value.borrow().clone();
        cached.ok_or_else(cyclic)
    }

    /// Read the value, recomputing it first if it is dirty.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed while it is being evaluated.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("computed read failed: {err}"),
        }
    }

    /// Forward a write to the setter.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(misuse(ReactiveError::ReadonlyComputed)),
        }
    }
}

impl<T> Computed<T> {
    /// Whether the next read will re-run the getter.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Whether a setter was supplied.
    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Stop tracking dependencies. The cached value is kept.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }

    /// Number of effects currently subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Computed");
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<evaluating>"),
        };
        s.field("dirty", &self.inner.dirty.get()).finish()
    }
}

/// Create a readonly computed value.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(getter)
}

/// Create a computed value with a setter.
pub fn writable_computed<T, G, S>(getter: G, setter: S) -> Computed<T>
where
    T: Clone + 'static,
    G: Fn() -> T + 'static,
    S: Fn(T) + 'static,
{
    Computed::with_setter(getter, setter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::Ref;

    fn counted<T: Clone + 'static>(
        runs: &Rc<Cell<usize>>,
        f: impl Fn() -> T + 'static,
    ) -> Computed<T> {
        let counter = runs.clone();
        computed(move || {
            counter.set(counter.get() + 1);
            f()
        })
    }

    #[test]
    fn computed_is_lazy() {
        let source = Ref::new(1);
        let runs = Rc::new(Cell::new(0));
        let reader = source.clone();
        let double = counted(&runs, move || reader.get() * 2);

        assert_eq!(runs.get(), 0);
        assert_eq!(double.get(), 2);
        assert_eq!(double.get(), 2);
        assert_eq!(runs.get(), 1);

        source.set(5);
        assert!(double.is_dirty());
        assert_eq!(runs.get(), 1);
        assert_eq!(double.get(), 10);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn chained_computeds_evaluate_on_read() {
        let source = Ref::new(1);
        let reader = source.clone();
        let plus_one = computed(move || reader.get() + 1);
        let upstream = plus_one.clone();
        let times_ten = computed(move || upstream.get() * 10);

        assert_eq!(times_ten.get(), 20);
        source.set(2);
        assert!(plus_one.is_dirty());
        assert!(times_ten.is_dirty());
        assert_eq!(times_ten.get(), 30);
    }

    #[test]
    fn effects_rerun_through_computeds() {
        let source = Ref::new(1);
        let reader = source.clone();
        let double = computed(move || reader.get() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let view = double.clone();
        let _runner = effect(move || sink.borrow_mut().push(view.get()));

        source.set(2);
        source.set(3);
        assert_eq!(*seen.borrow(), vec![2, 4, 6]);
    }

    #[test]
    fn readonly_computed_rejects_writes() {
        let constant = computed(|| 1);
        assert_eq!(constant.set(2), Err(ReactiveError::ReadonlyComputed));
        assert!(!constant.is_writable());
    }

    #[test]
    fn setter_receives_writes() {
        let source = Ref::new(1);
        let reader = source.clone();
        let writer = source.clone();
        let double = writable_computed(move || reader.get() * 2, move |v: i32| writer.set(v / 2));

        double.set(8).unwrap();
        assert_eq!(source.get_untracked(), 4);
        assert_eq!(double.get(), 8);
    }

    #[test]
    fn stopped_computed_keeps_its_value() {
        let source = Ref::new(1);
        let reader = source.clone();
        let double = computed(move || reader.get() * 2);
        assert_eq!(double.get(), 2);

        double.stop();
        source.set(3);
        assert!(!double.is_dirty());
        assert_eq!(double.get(), 2);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let me = slot.clone();
        let looped = computed(move || {
            let this = me.borrow().clone();
            this.map(|c| c.try_get().unwrap_or(-1)).unwrap_or(0)
        });
        *slot.borrow_mut() = Some(looped.clone());

        assert_eq!(looped.get(), -1);
        slot.borrow_mut().take();
    }

    #[test]
    fn dropping_a_computed_unsubscribes_it() {
        let source = Ref::new(1);
        let reader = source.clone();
        let double = computed(move || reader.get() * 2);
        double.get();
        assert_eq!(source.subscriber_count(), 1);

        drop(double);
        assert_eq!(source.subscriber_count(), 0);
    }
}
