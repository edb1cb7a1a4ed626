//! Dynamic Values
//!
//! Reactive wrappers intercept reads and writes on aggregate values. Rust has
//! no transparent property interception, so aggregates are modelled as a
//! dynamic [`Value`] tree with explicit accessors.
//!
//! # Identity
//!
//! [`Object`] and [`Array`] are shared handles: cloning one clones the
//! handle, not the contents. Each raw aggregate therefore has a stable
//! identity, which is what the wrapper cache is keyed by and what
//! [`Value`]'s equality compares for aggregates.
//!
//! Raw handles do not track or trigger anything. Only access through a
//! [`Reactive`] wrapper does.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::proxy::Reactive;
use super::refs::Ref;
use super::runtime::KeyedDeps;

/// Largest array length. Valid indices are strictly below it.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Key of a property or element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// A named object property.
    Key(String),
    /// An array element.
    Index(usize),
    /// An array's length.
    Length,
}

impl PropKey {
    /// Interpret the key the way an array would.
    ///
    /// Indices at or past [`MAX_ARRAY_LENGTH`] become plain keys.
    pub(crate) fn for_array(self) -> Self {
        match self {
            Self::Key(key) if key == "length" => Self::Length,
            Self::Key(key) => match key.parse::<usize>() {
                Ok(index) if index < MAX_ARRAY_LENGTH => Self::Index(index),
                _ => Self::Key(key),
            },
            Self::Index(index) if index >= MAX_ARRAY_LENGTH => Self::Key(index.to_string()),
            other => other,
        }
    }

    /// Interpret the key the way an object would.
    pub(crate) fn for_object(self) -> Self {
        match self {
            Self::Index(index) => Self::Key(index.to_string()),
            Self::Length => Self::Key("length".to_string()),
            key => key,
        }
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
            Self::Length => f.write_str("length"),
        }
    }
}

impl From<&str> for PropKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PropKey {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<&String> for PropKey {
    fn from(key: &String) -> Self {
        Self::Key(key.clone())
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A raw array handle.
    Array(Array),
    /// A raw object handle.
    Object(Object),
    /// A reactive or readonly wrapper around an aggregate.
    Reactive(Reactive),
    /// A ref stored inside an aggregate.
    Ref(Ref<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, if it has no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Self::Reactive(wrapper) => Some(wrapper),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&Ref<Value>> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this is an object or array, raw or wrapped.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_) | Self::Reactive(_))
    }

    /// The raw aggregate behind this value, if any.
    pub(crate) fn target(&self) -> Option<Target> {
        match self {
            Self::Array(arr) => Some(Target::Array(arr.clone())),
            Self::Object(obj) => Some(Target::Object(obj.clone())),
            Self::Reactive(wrapper) => Some(wrapper.target().clone()),
            _ => None,
        }
    }

    /// Short name of the value's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Reactive(_) => "reactive",
            Self::Ref(_) => "ref",
        }
    }

    /// Convert into plain JSON, reading through wrappers and refs untracked.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => match self.as_i64() {
                Some(i) => serde_json::Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            },
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(arr) => {
                serde_json::Value::Array(arr.to_vec().iter().map(Value::to_json).collect())
            }
            Self::Object(obj) => serde_json::Value::Object(
                obj.entries()
                    .into_iter()
                    .map(|(key, value)| (key, value.to_json()))
                    .collect(),
            ),
            Self::Reactive(wrapper) => wrapper.to_raw().to_json(),
            Self::Ref(r) => r.get_untracked().to_json(),
        }
    }
}

/// Same-value comparison: NaN equals NaN, `0.0` and `-0.0` differ, and
/// aggregates compare by the identity of the raw value behind them, so a
/// wrapper equals its own source.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a.ptr_eq(b),
            _ => match (self.target(), other.target()) {
                (Some(a), Some(b)) => a.id() == b.id(),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(arr) => fmt::Debug::fmt(arr, f),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
            Self::Reactive(wrapper) => fmt::Debug::fmt(wrapper, f),
            Self::Ref(r) => fmt::Debug::fmt(r, f),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => match self.as_i64() {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(arr) => arr.serialize(serializer),
            Self::Object(obj) => obj.serialize(serializer),
            Self::Reactive(wrapper) => wrapper.to_raw().serialize(serializer),
            Self::Ref(r) => r.get_untracked().serialize(serializer),
        }
    }
}

macro_rules! value_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(n as f64)
                }
            }
        )*
    };
}

value_from_number!(f64, f32, i32, i64, u32, u64, usize);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Self::Object(obj)
    }
}

impl From<Array> for Value {
    fn from(arr: Array) -> Self {
        Self::Array(arr)
    }
}

impl From<Reactive> for Value {
    fn from(wrapper: Reactive) -> Self {
        Self::Reactive(wrapper)
    }
}

impl From<Ref<Value>> for Value {
    fn from(r: Ref<Value>) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().collect()),
            serde_json::Value::Object(fields) => Self::Object(fields.into_iter().collect()),
        }
    }
}

/// A raw, insertion-ordered object.
#[derive(Clone, Default)]
pub struct Object(Rc<ObjectInner>);

#[derive(Default)]
pub(crate) struct ObjectInner {
    fields: RefCell<IndexMap<String, Value>>,
    deps: KeyedDeps,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.fields.borrow_mut().insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.fields.borrow().get(key).cloned()
    }

    /// Remove a field, keeping the order of the others.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.fields.borrow_mut().shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.fields.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.fields.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .fields
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.0.fields.borrow_mut().clear();
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn deps(&self) -> &KeyedDeps {
        &self.0.deps
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let obj = Self::new();
        for (key, value) in iter {
            obj.insert(key, value);
        }
        obj
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.fields.borrow().iter()).finish()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.0.fields.borrow();
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (key, value) in fields.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A raw array.
#[derive(Clone, Default)]
pub struct Array(Rc<ArrayInner>);

#[derive(Default)]
pub(crate) struct ArrayInner {
    items: RefCell<Vec<Value>>,
    deps: KeyedDeps,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.items.borrow_mut().push(value.into());
    }

    pub fn pop(&self) -> Option<Value> {
        self.0.items.borrow_mut().pop()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Write an element, padding with `Null` when writing past the end.
    ///
    /// Returns `false`, leaving the array untouched, if `index` is not
    /// below [`MAX_ARRAY_LENGTH`].
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        if index >= MAX_ARRAY_LENGTH {
            return false;
        }
        let mut items = self.0.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value.into();
        true
    }

    /// Insert an element, appending when `index` is past the end.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let mut items = self.0.items.borrow_mut();
        let index = index.min(items.len());
        items.insert(index, value.into());
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.0.items.borrow_mut();
        (index < items.len()).then(|| items.remove(index))
    }

    /// Truncate or pad with `Null` to exactly `len` elements.
    pub fn resize(&self, len: usize) {
        self.0.items.borrow_mut().resize(len, Value::Null);
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.0.items.borrow_mut().clear();
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Whether both handles refer to the same array.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn deps(&self) -> &KeyedDeps {
        &self.0.deps
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let arr = Self::new();
        for value in iter {
            arr.push(value);
        }
        arr
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let items = self.0.items.borrow();
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items.iter() {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// A raw aggregate that a wrapper intercepts.
#[derive(Clone, Debug)]
pub(crate) enum Target {
    Object(Object),
    Array(Array),
}

impl Target {
    pub(crate) fn id(&self) -> usize {
        match self {
            Self::Object(obj) => obj.id(),
            Self::Array(arr) => arr.id(),
        }
    }

    pub(crate) fn deps(&self) -> &KeyedDeps {
        match self {
            Self::Object(obj) => obj.deps(),
            Self::Array(arr) => arr.deps(),
        }
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub(crate) fn normalize(&self, key: PropKey) -> PropKey {
        match self {
            Self::Object(_) => key.for_object(),
            Self::Array(_) => key.for_array(),
        }
    }

    /// Read a normalized key without tracking.
    pub(crate) fn read(&self, key: &PropKey) -> Option<Value> {
        match (self, key) {
            (Self::Object(obj), PropKey::Key(key)) => obj.get(key),
            (Self::Array(arr), PropKey::Index(index)) => arr.get(*index),
            (Self::Array(arr), PropKey::Length) => Some(Value::from(arr.len())),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, key: &PropKey) -> bool {
        match (self, key) {
            (Self::Object(obj), PropKey::Key(key)) => obj.contains_key(key),
            (Self::Array(arr), PropKey::Index(index)) => *index < arr.len(),
            (Self::Array(_), PropKey::Length) => true,
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Object(obj) => obj.len(),
            Self::Array(arr) => arr.len(),
        }
    }

    pub(crate) fn keys(&self) -> Vec<PropKey> {
        match self {
            Self::Object(obj) => obj.keys().into_iter().map(PropKey::Key).collect(),
            Self::Array(arr) => (0..arr.len()).map(PropKey::Index).collect(),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Object(obj) => Value::Object(obj.clone()),
            Self::Array(arr) => Value::Array(arr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_handles_share_contents() {
        let a = Object::new();
        let b = a.clone();
        a.insert("x", 1);

        assert_eq!(b.get("x"), Some(Value::from(1)));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Object::new()));
    }

    #[test]
    fn object_preserves_insertion_order() {
        let obj: Object = [("b", 1), ("a", 2), ("c", 3)].into_iter().collect();
        obj.remove("a");
        assert_eq!(obj.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn array_keys_stop_at_the_length_limit() {
        assert_eq!(PropKey::from("7").for_array(), PropKey::Index(7));
        assert_eq!(
            PropKey::Index(MAX_ARRAY_LENGTH).for_array(),
            PropKey::Key(MAX_ARRAY_LENGTH.to_string())
        );

        let arr = Array::new();
        assert!(!arr.set(usize::MAX, 1));
        assert!(arr.is_empty());
    }

    #[test]
    fn array_set_past_end_pads_with_null() {
        let arr: Array = [1, 2].into_iter().collect();
        assert!(arr.set(4, 9));
        assert_eq!(arr.len(), 5);
        assert_eq!(arr.get(3), Some(Value::Null));
        assert_eq!(arr.get(4), Some(Value::from(9)));
    }

    #[test]
    fn same_value_equality() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0), Value::from(-0.0));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::from(1), Value::from("1"));

        let obj = Object::new();
        assert_eq!(Value::from(obj.clone()), Value::from(obj.clone()));
        assert_ne!(Value::from(obj), Value::from(Object::new()));
    }

    #[test]
    fn array_keys_normalize() {
        assert_eq!(PropKey::from("length").for_array(), PropKey::Length);
        assert_eq!(PropKey::from("3").for_array(), PropKey::Index(3));
        assert_eq!(PropKey::from(3).for_object(), PropKey::Key("3".into()));
        assert_eq!(PropKey::from("name").for_array(), PropKey::Key("name".into()));
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({ "name": "ripple", "tags": [1, 2.5, null], "ok": true });
        let value = Value::from(json.clone());

        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("name"), Some(Value::from("ripple")));
        assert_eq!(obj.get("tags").unwrap().as_array().unwrap().len(), 3);
        assert_eq!(value.to_json(), json);
        assert_eq!(serde_json::to_value(&value).unwrap(), json);
    }
}
