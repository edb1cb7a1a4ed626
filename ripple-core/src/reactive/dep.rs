//! Dependency sets.
//!
//! A [`Dep`] is the subscriber collection for one trackable slot: a property
//! of a reactive aggregate, a [`Ref`](super::Ref), or the outward side of a
//! [`Computed`](super::Computed). Deps and effects link to each other in both
//! directions so either side can unlink in O(1).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::effect::{trigger_effects, EffectInner};
use super::value::PropKey;
use super::SubscriberId;

/// Identifier of a dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DepId(u64);

impl DepId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The slot a dependency set belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A property or index of a reactive aggregate.
    Prop(PropKey),
    /// Key iteration and existence over an object.
    Iterate,
    /// The single slot of a ref or computed.
    Value,
}

/// Kind of read that subscribed an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    /// A value read.
    Get,
    /// A key-existence check.
    Has,
    /// Iteration over keys or elements.
    Iterate,
}

/// Kind of write that notified subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing slot changed value.
    Set,
    /// A new key or index was added.
    Add,
    /// A key was removed.
    Delete,
    /// Every key was removed.
    Clear,
}

/// Subscriber set for one trackable slot.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

struct DepInner {
    id: DepId,
    key: DepKey,
    subscribers: RefCell<IndexMap<SubscriberId, Rc<EffectInner>>>,
}

pub(crate) type Subscribers = SmallVec<[Rc<EffectInner>; 8]>;

impl Dep {
    /// Create a dependency set for a single-value slot.
    pub fn new() -> Self {
        Self::keyed(DepKey::Value)
    }

    pub(crate) fn keyed(key: DepKey) -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::new(),
                key,
                subscribers: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn id(&self) -> DepId {
        self.inner.id
    }

    /// The slot this set belongs to.
    pub fn key(&self) -> &DepKey {
        &self.inner.key
    }

    /// Subscribe the running effect, if reads are being tracked.
    pub fn track(&self, op: TrackOp) {
        if let Some(effect) = ReactiveContext::tracking_effect() {
            effect.link(self, op);
        }
    }

    /// Notify every effect currently subscribed.
    pub fn trigger(&self, op: TriggerOp) {
        trigger_effects(self.snapshot(), op, self.key());
    }

    /// Number of effects currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Whether the effect with `id` is currently subscribed.
    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.borrow().contains_key(&id)
    }

    pub(crate) fn subscribe(&self, effect: &Rc<EffectInner>) {
        self.inner
            .subscribers
            .borrow_mut()
            .insert(effect.id(), Rc::clone(effect));
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.borrow_mut().swap_remove(&id);
    }

    /// Copy of the subscriber list, safe to iterate while subscribers run.
    pub(crate) fn snapshot(&self) -> Subscribers {
        self.inner.subscribers.borrow().values().cloned().collect()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("key", &self.inner.key)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
