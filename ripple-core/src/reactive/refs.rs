//! Refs
//!
//! A [`Ref`] is a single reactive cell. Reading it inside an effect
//! subscribes the effect; writing a different value notifies subscribers.
//!
//! ```
//! use ripple_core::reactive::{effect, Ref};
//!
//! let count = Ref::new(0);
//! let reader = count.clone();
//! let _log = effect(move || println!("count = {}", reader.get()));
//!
//! count.set(1); // prints "count = 1"
//! count.set(1); // unchanged, nothing printed
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::dep::{Dep, TrackOp, TriggerOp};
use super::proxy::to_reactive;
use super::value::Value;

/// A reactive single-value container.
pub struct Ref<T> {
    inner: Rc<RefInner<T>>,
}

struct RefInner<T> {
    value: RefCell<T>,
    dep: Dep,
    convert: Option<fn(T) -> T>,
}

impl<T: 'static> Ref<T> {
    /// Create a ref that stores values as given.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefInner {
                value: RefCell::new(value),
                dep: Dep::new(),
                convert: None,
            }),
        }
    }

    /// Borrow the value, tracking the read.
    ///
    /// The ref must not be written from within `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.dep.track(TrackOp::Get);
        f(&self.inner.value.borrow())
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        self.inner.dep.trigger(TriggerOp::Set);
    }

    /// Number of effects currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }

    /// Whether both handles refer to the same ref.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether stored values are converted on write.
    pub fn is_deep(&self) -> bool {
        self.inner.convert.is_some()
    }
}

impl<T: Clone + 'static> Ref<T> {
    /// Read the value, tracking the read.
    pub fn get(&self) -> T {
        self.inner.dep.track(TrackOp::Get);
        self.get_untracked()
    }

    /// Read the value without subscribing anything.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

/// Whether replacing `old` with `new` is a change. Two values that are each
/// unequal to themselves (NaN) count as unchanged.
fn has_changed<T: PartialEq>(old: &T, new: &T) -> bool {
    #[allow(clippy::eq_op)]
    let self_unequal = old != old && new != new;
    old != new && !self_unequal
}

impl<T: PartialEq + 'static> Ref<T> {
    /// Store a value, notifying subscribers if it differs from the old one.
    ///
    /// The check uses `T`'s `PartialEq`, except that NaN-like values never
    /// differ from each other.
    pub fn set(&self, value: T) {
        let value = match self.inner.convert {
            Some(convert) => convert(value),
            None => value,
        };
        if !has_changed(&*self.inner.value.borrow(), &value) {
            return;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.dep.trigger(TriggerOp::Set);
    }

    /// Store the result of applying `f` to the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let current = self.inner.value.borrow();
            f(&current)
        };
        self.set(next);
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.try_borrow() {
            Ok(value) => f.debug_tuple("Ref").field(&*value).finish(),
            Err(_) => f.write_str("Ref(<borrowed>)"),
        }
    }
}

/// Create a ref whose aggregate values are made reactive on write.
pub fn reactive_ref(value: impl Into<Value>) -> Ref<Value> {
    Ref {
        inner: Rc::new(RefInner {
            value: RefCell::new(to_reactive(value.into())),
            dep: Dep::new(),
            convert: Some(to_reactive),
        }),
    }
}

/// Notify a ref's subscribers without changing its value.
pub fn trigger_ref<T: 'static>(r: &Ref<T>) {
    r.trigger();
}

/// Whether `value` is a ref.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The ref's current value if `value` is a ref, otherwise `value` itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::proxy::is_reactive;
    use crate::reactive::value::Object;
    use std::cell::Cell;

    #[test]
    fn set_notifies_only_on_change() {
        let count = Ref::new(1);
        let runs = Rc::new(Cell::new(0));
        let reader = count.clone();
        let counter = runs.clone();
        let _runner = effect(move || {
            reader.get();
            counter.set(counter.get() + 1);
        });

        count.set(1);
        assert_eq!(runs.get(), 1);
        count.set(2);
        assert_eq!(runs.get(), 2);
        count.update(|n| n * 10);
        assert_eq!(count.get_untracked(), 20);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn float_nan_is_not_a_change() {
        let value = Ref::new(f64::NAN);
        let runs = Rc::new(Cell::new(0));
        let reader = value.clone();
        let counter = runs.clone();
        let _runner = effect(move || {
            reader.get();
            counter.set(counter.get() + 1);
        });

        value.set(f64::NAN);
        assert_eq!(runs.get(), 1);
        value.set(1.5);
        assert_eq!(runs.get(), 2);
        value.set(f64::NAN);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn nan_is_not_a_change() {
        let value = Ref::new(Value::from(f64::NAN));
        let runs = Rc::new(Cell::new(0));
        let reader = value.clone();
        let counter = runs.clone();
        let _runner = effect(move || {
            reader.get();
            counter.set(counter.get() + 1);
        });

        value.set(Value::from(f64::NAN));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn trigger_forces_a_rerun() {
        let items = Ref::new(vec![1]);
        let runs = Rc::new(Cell::new(0));
        let reader = items.clone();
        let counter = runs.clone();
        let _runner = effect(move || {
            reader.with(|v| v.len());
            counter.set(counter.get() + 1);
        });

        trigger_ref(&items);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn reactive_ref_wraps_aggregates() {
        let state = reactive_ref(Object::new());
        assert!(state.is_deep());
        assert!(is_reactive(&state.get_untracked()));

        state.set(Value::from(Object::new()));
        assert!(is_reactive(&state.get_untracked()));
        assert!(!Ref::new(Value::from(Object::new())).is_deep());
    }

    #[test]
    fn unref_reads_through() {
        let r = Ref::new(Value::from(3));
        assert!(is_ref(&Value::from(r.clone())));
        assert_eq!(unref(&Value::from(r)), Value::from(3));
        assert_eq!(unref(&Value::from("x")), Value::from("x"));
    }
}
