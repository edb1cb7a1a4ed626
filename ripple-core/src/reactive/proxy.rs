//! Reactive Wrappers
//!
//! A [`Reactive`] wraps a raw [`Object`] or [`Array`] and intercepts every
//! access: reads subscribe the running effect, writes notify subscribers.
//!
//! # Flavors
//!
//! | constructor          | tracks | writes  | nested aggregates   |
//! |----------------------|--------|---------|---------------------|
//! | [`reactive`]         | yes    | allowed | wrapped reactive    |
//! | [`shallow_reactive`] | yes    | allowed | returned raw        |
//! | [`readonly`]         | no     | refused | wrapped readonly    |
//! | [`shallow_readonly`] | no     | refused | returned raw        |
//!
//! A readonly wrapper built over a reactive one reads through it, so it
//! tracks like its base while still refusing writes.
//!
//! # Identity
//!
//! Wrapping the same raw value twice with the same flavor yields the same
//! wrapper, as long as the first one is still alive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::dep::{DepKey, TrackOp, TriggerOp};
use super::runtime::Runtime;
use super::value::{Array, Object, PropKey, Target, Value, MAX_ARRAY_LENGTH};
use crate::error::{misuse, ReactiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Flavor {
    readonly: bool,
    shallow: bool,
}

impl Flavor {
    const REACTIVE: Self = Self { readonly: false, shallow: false };
    const SHALLOW_REACTIVE: Self = Self { readonly: false, shallow: true };
    const READONLY: Self = Self { readonly: true, shallow: false };
    const SHALLOW_READONLY: Self = Self { readonly: true, shallow: true };
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    target: usize,
    flavor: Flavor,
    base: Option<Flavor>,
}

thread_local! {
    static WRAPPERS: RefCell<HashMap<CacheKey, Weak<ReactiveInner>>> = RefCell::new(HashMap::new());
}

struct ReactiveInner {
    target: Target,
    base: Option<Reactive>,
    flavor: Flavor,
}

impl ReactiveInner {
    fn cache_key(&self) -> CacheKey {
        CacheKey {
            target: self.target.id(),
            flavor: self.flavor,
            base: self.base.as_ref().map(|base| base.0.flavor),
        }
    }
}

impl Drop for ReactiveInner {
    fn drop(&mut self) {
        let key = self.cache_key();
        // The cache may already be gone during thread teardown.
        let _ = WRAPPERS.try_with(|cache| {
            if let Ok(mut cache) = cache.try_borrow_mut() {
                if cache.get(&key).is_some_and(|weak| weak.strong_count() == 0) {
                    cache.remove(&key);
                }
            }
        });
    }
}

/// Anything a wrapper can be built from.
pub enum Source {
    Object(Object),
    Array(Array),
    Reactive(Reactive),
}

impl From<Object> for Source {
    fn from(obj: Object) -> Self {
        Self::Object(obj)
    }
}

impl From<Array> for Source {
    fn from(arr: Array) -> Self {
        Self::Array(arr)
    }
}

impl From<Reactive> for Source {
    fn from(wrapper: Reactive) -> Self {
        Self::Reactive(wrapper)
    }
}

impl From<&Object> for Source {
    fn from(obj: &Object) -> Self {
        Self::Object(obj.clone())
    }
}

impl From<&Array> for Source {
    fn from(arr: &Array) -> Self {
        Self::Array(arr.clone())
    }
}

impl From<&Reactive> for Source {
    fn from(wrapper: &Reactive) -> Self {
        Self::Reactive(wrapper.clone())
    }
}

/// An intercepting wrapper around a raw object or array.
#[derive(Clone)]
pub struct Reactive(Rc<ReactiveInner>);

fn create(source: Source, flavor: Flavor) -> Reactive {
    let (target, base) = match source {
        Source::Object(obj) => (Target::Object(obj), None),
        Source::Array(arr) => (Target::Array(arr), None),
        Source::Reactive(existing) => {
            if !flavor.readonly || existing.is_readonly() {
                return existing;
            }
            (existing.0.target.clone(), Some(existing))
        }
    };

    let inner = ReactiveInner { target, base, flavor };
    let key = inner.cache_key();
    let cached = WRAPPERS.with(|cache| cache.borrow().get(&key).and_then(Weak::upgrade));
    if let Some(found) = cached {
        return Reactive(found);
    }

    let inner = Rc::new(inner);
    WRAPPERS.with(|cache| cache.borrow_mut().insert(key, Rc::downgrade(&inner)));
    Reactive(inner)
}

/// Deep reactive wrapper.
pub fn reactive(source: impl Into<Source>) -> Reactive {
    create(source.into(), Flavor::REACTIVE)
}

/// Reactive wrapper that leaves nested aggregates raw.
pub fn shallow_reactive(source: impl Into<Source>) -> Reactive {
    create(source.into(), Flavor::SHALLOW_REACTIVE)
}

/// Deep readonly wrapper.
pub fn readonly(source: impl Into<Source>) -> Reactive {
    create(source.into(), Flavor::READONLY)
}

/// Readonly wrapper that leaves nested aggregates raw.
pub fn shallow_readonly(source: impl Into<Source>) -> Reactive {
    create(source.into(), Flavor::SHALLOW_READONLY)
}

impl Reactive {
    pub(crate) fn target(&self) -> &Target {
        &self.0.target
    }

    pub fn is_readonly(&self) -> bool {
        self.0.flavor.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.0.flavor.shallow
    }

    /// Whether reads are tracked: a mutable wrapper, or a readonly one over it.
    pub fn is_reactive(&self) -> bool {
        !self.is_readonly() || self.0.base.as_ref().is_some_and(Reactive::is_reactive)
    }

    pub fn is_array(&self) -> bool {
        self.0.target.is_array()
    }

    /// The raw value behind this wrapper.
    pub fn to_raw(&self) -> Value {
        self.0.target.to_value()
    }

    /// Whether both handles are the same wrapper.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn tracks_directly(&self) -> bool {
        !self.is_readonly() && self.0.base.is_none()
    }

    fn wrap_child(&self, value: Value) -> Value {
        if self.is_shallow() {
            return value;
        }
        if self.is_readonly() {
            to_readonly(value)
        } else {
            to_reactive(value)
        }
    }

    /// Read a property or element.
    ///
    /// Missing keys read as `Null`. Nested aggregates come back wrapped with
    /// this wrapper's flavor unless it is shallow, and refs stored on object
    /// keys are unwrapped.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = self.0.target.normalize(key.into());
        if let Some(base) = &self.0.base {
            return self.wrap_child(base.get(key));
        }
        if self.tracks_directly() {
            Runtime::track(&self.0.target, TrackOp::Get, DepKey::Prop(key.clone()));
        }

        let value = self.0.target.read(&key).unwrap_or_default();
        if self.is_shallow() {
            return value;
        }
        match value {
            Value::Ref(r) if !self.is_array() => self.wrap_child(r.get()),
            other => self.wrap_child(other),
        }
    }

    /// Write a property or element.
    ///
    /// Subscribers are notified only when a key is added or the stored value
    /// actually changes.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = self.0.target.normalize(key.into());
        if self.is_readonly() {
            return Err(misuse(ReactiveError::ReadonlyMutation { key: key.to_string() }));
        }

        let mut value = value.into();
        if !self.is_shallow() && !is_shallow(&value) && !is_readonly(&value) {
            value = to_raw(&value);
        }

        match &self.0.target {
            Target::Object(obj) => {
                let PropKey::Key(name) = &key else {
                    return Err(misuse(ReactiveError::InvalidArrayKey { key: key.to_string() }));
                };
                let old = obj.get(name);
                if !self.is_shallow() {
                    if let (Some(Value::Ref(slot)), false) = (&old, matches!(value, Value::Ref(_))) {
                        slot.set(value);
                        return Ok(());
                    }
                }
                obj.insert(name.clone(), value.clone());
                match old {
                    None => Runtime::trigger(&self.0.target, TriggerOp::Add, key),
                    Some(old) if old != value => {
                        Runtime::trigger(&self.0.target, TriggerOp::Set, key)
                    }
                    Some(_) => {}
                }
            }
            Target::Array(arr) => match key {
                PropKey::Index(index) => {
                    let old = arr.get(index);
                    arr.set(index, value.clone());
                    match old {
                        None => Runtime::trigger(&self.0.target, TriggerOp::Add, key),
                        Some(old) if old != value => {
                            Runtime::trigger(&self.0.target, TriggerOp::Set, key)
                        }
                        Some(_) => {}
                    }
                }
                PropKey::Length => {
                    let new_len = value
                        .as_f64()
                        .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= MAX_ARRAY_LENGTH as f64)
                        .map(|n| n as usize)
                        .ok_or_else(|| {
                            misuse(ReactiveError::InvalidArrayLength { value: format!("{value:?}") })
                        })?;
                    if new_len != arr.len() {
                        arr.resize(new_len);
                        Runtime::trigger_length(&self.0.target, new_len);
                    }
                }
                PropKey::Key(name) => {
                    return Err(misuse(ReactiveError::InvalidArrayKey { key: name }));
                }
            },
        }
        Ok(())
    }

    /// Remove a property. On arrays this leaves a `Null` hole.
    ///
    /// Returns whether the key existed.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        let key = self.0.target.normalize(key.into());
        if self.is_readonly() {
            return Err(misuse(ReactiveError::ReadonlyDelete { key: key.to_string() }));
        }

        let existed = match (&self.0.target, &key) {
            (Target::Object(obj), PropKey::Key(name)) => obj.remove(name).is_some(),
            (Target::Array(arr), PropKey::Index(index)) if *index < arr.len() => {
                arr.set(*index, Value::Null);
                true
            }
            _ => false,
        };
        if existed {
            Runtime::trigger(&self.0.target, TriggerOp::Delete, key);
        }
        Ok(existed)
    }

    /// Whether a key exists.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = self.0.target.normalize(key.into());
        if let Some(base) = &self.0.base {
            return base.has(key);
        }
        if self.tracks_directly() {
            Runtime::track(&self.0.target, TrackOp::Has, DepKey::Prop(key.clone()));
        }
        self.0.target.contains(&key)
    }

    fn track_iteration(&self) {
        if !self.tracks_directly() {
            return;
        }
        if self.is_array() {
            Runtime::track(&self.0.target, TrackOp::Iterate, DepKey::Prop(PropKey::Length));
        } else {
            Runtime::track(&self.0.target, TrackOp::Iterate, DepKey::Iterate);
        }
    }

    /// Keys in order: field names for objects, indices for arrays.
    pub fn keys(&self) -> Vec<PropKey> {
        if let Some(base) = &self.0.base {
            return base.keys();
        }
        self.track_iteration();
        self.0.target.keys()
    }

    /// Number of fields or elements.
    pub fn len(&self) -> usize {
        if let Some(base) = &self.0.base {
            return base.len();
        }
        self.track_iteration();
        self.0.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys paired with their values, read as [`get`](Self::get) would.
    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.clone());
                (key, value)
            })
            .collect()
    }

    /// Every value, read as [`get`](Self::get) would.
    pub fn to_vec(&self) -> Vec<Value> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Remove every key.
    pub fn clear(&self) -> Result<()> {
        if self.is_readonly() {
            return Err(misuse(ReactiveError::ReadonlyDelete { key: "*".to_string() }));
        }
        if self.0.target.len() == 0 {
            return Ok(());
        }
        match &self.0.target {
            Target::Object(obj) => obj.clear(),
            Target::Array(arr) => arr.clear(),
        }
        Runtime::trigger_clear(&self.0.target);
        Ok(())
    }

    fn writable_array(&self, operation: &'static str) -> Result<&Array> {
        match &self.0.target {
            Target::Array(arr) if !self.is_readonly() => Ok(arr),
            Target::Array(_) => Err(misuse(ReactiveError::ReadonlyMutation {
                key: operation.to_string(),
            })),
            Target::Object(_) => Err(misuse(ReactiveError::NotAnArray { operation })),
        }
    }

    fn incoming(&self, value: Value) -> Value {
        if self.is_shallow() || is_shallow(&value) || is_readonly(&value) {
            value
        } else {
            to_raw(&value)
        }
    }

    /// Append an element, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let arr = self.writable_array("push")?;
        let index = arr.len();
        arr.push(self.incoming(value.into()));
        Runtime::trigger(&self.0.target, TriggerOp::Add, PropKey::Index(index));
        Ok(index + 1)
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>> {
        let arr = self.writable_array("pop")?;
        let popped = arr.pop();
        if popped.is_some() {
            Runtime::trigger_length(&self.0.target, arr.len());
        }
        Ok(popped.map(|value| self.wrap_child(value)))
    }

    /// Insert an element, shifting later ones up. Appends past the end.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let arr = self.writable_array("insert")?;
        if index >= MAX_ARRAY_LENGTH || arr.len() >= MAX_ARRAY_LENGTH {
            return Err(misuse(ReactiveError::InvalidArrayKey { key: index.to_string() }));
        }
        let index = index.min(arr.len());
        arr.insert(index, self.incoming(value.into()));
        Runtime::trigger_shift(&self.0.target, index);
        Ok(())
    }

    /// Remove an element, shifting later ones down.
    pub fn remove(&self, index: usize) -> Result<Option<Value>> {
        let arr = self.writable_array("remove")?;
        let removed = arr.remove(index);
        if removed.is_some() {
            Runtime::trigger_shift(&self.0.target, index);
        }
        Ok(removed.map(|value| self.wrap_child(value)))
    }

    /// Position of the first element equal to `needle`.
    ///
    /// Wrappers and their raw values compare equal, so searching for either
    /// finds the element.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        let len = self.len();
        (0..len).find(|&index| self.get(index) == *needle)
    }

    pub fn contains(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("readonly", &self.is_readonly())
            .field("shallow", &self.is_shallow())
            .field("target", &self.0.target)
            .finish()
    }
}

/// Wrap an aggregate value reactive; other values pass through.
pub fn to_reactive(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Reactive(reactive(obj)),
        Value::Array(arr) => Value::Reactive(reactive(arr)),
        Value::Reactive(wrapper) => Value::Reactive(reactive(wrapper)),
        other => other,
    }
}

/// Wrap an aggregate value readonly; other values pass through.
pub fn to_readonly(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Reactive(readonly(obj)),
        Value::Array(arr) => Value::Reactive(readonly(arr)),
        Value::Reactive(wrapper) => Value::Reactive(readonly(wrapper)),
        other => other,
    }
}

/// Whether `value` is a tracking wrapper.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(wrapper) if wrapper.is_reactive())
}

/// Whether `value` is a readonly wrapper.
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Reactive(wrapper) if wrapper.is_readonly())
}

/// Whether `value` is a shallow wrapper or a ref that stores values as-is.
pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Reactive(wrapper) => wrapper.is_shallow(),
        Value::Ref(r) => !r.is_deep(),
        _ => false,
    }
}

/// Whether `value` is any kind of wrapper.
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// The raw value behind a wrapper; other values are returned as-is.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Reactive(wrapper) => wrapper.to_raw(),
        other => other.clone(),
    }
}
