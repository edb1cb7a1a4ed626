//! Effect Scopes
//!
//! An [`EffectScope`] collects the effects created while it runs, along with
//! nested scopes and dispose callbacks, so they can all be stopped together.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::{self, ScopeContext};
use super::effect::EffectInner;
use crate::error::{report, ReactiveError};

pub(crate) struct ScopeInner {
    active: Cell<bool>,
    detached: bool,
    effects: RefCell<Vec<Rc<EffectInner>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<Rc<ScopeInner>>>,
    parent: RefCell<Option<Weak<ScopeInner>>>,
}

impl ScopeInner {
    pub(crate) fn record_effect(&self, effect: &Rc<EffectInner>) {
        if self.active.get() {
            self.effects.borrow_mut().push(Rc::clone(effect));
        }
    }

    fn stop(self: &Rc<Self>, from_parent: bool) {
        if !self.active.replace(false) {
            return;
        }

        let effects = std::mem::take(&mut *self.effects.borrow_mut());
        let effect_count = effects.len();
        for effect in effects {
            effect.stop();
        }

        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }

        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.stop(true);
        }

        let parent = self.parent.borrow_mut().take();
        if !from_parent {
            if let Some(parent) = parent.and_then(|p| p.upgrade()) {
                parent
                    .children
                    .borrow_mut()
                    .retain(|child| !Rc::ptr_eq(child, self));
            }
        }

        tracing::trace!(effects = effect_count, "effect scope stopped");
    }
}

/// A group of effects that are stopped together.
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope owned by the currently active scope, if any.
    pub fn new() -> Self {
        Self::create(false)
    }

    /// Create a scope that no outer scope will stop.
    pub fn detached() -> Self {
        Self::create(true)
    }

    fn create(detached: bool) -> Self {
        let parent = if detached { None } else { context::active_scope() };
        let inner = Rc::new(ScopeInner {
            active: Cell::new(true),
            detached,
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(parent.as_ref().map(Rc::downgrade)),
        });

        if let Some(parent) = parent.filter(|p| p.active.get()) {
            parent.children.borrow_mut().push(Rc::clone(&inner));
        }
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<ScopeInner> {
        &self.inner
    }

    /// Run `f` with this scope collecting new effects.
    ///
    /// Returns `None` without running `f` if the scope has been stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.inner.active.get() {
            report(&ReactiveError::InactiveScope);
            return None;
        }
        let _scope = ScopeContext::enter(Rc::clone(&self.inner));
        Some(f())
    }

    /// Stop every owned effect, run dispose callbacks, and stop nested
    /// scopes. Later calls do nothing.
    pub fn stop(&self) {
        self.inner.stop(false);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    /// Number of effects this scope will stop.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Number of nested scopes this scope will stop.
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.is_detached())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Create a scope; a detached one is not stopped by its enclosing scope.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope::create(detached)
}

/// The scope currently collecting new effects.
pub fn get_current_scope() -> Option<EffectScope> {
    context::active_scope().map(|inner| EffectScope { inner })
}

/// Register `f` to run when the active scope stops.
///
/// Returns `false`, and drops `f`, if no scope is active.
pub fn on_scope_dispose<F>(f: F) -> bool
where
    F: FnOnce() + 'static,
{
    match context::active_scope() {
        Some(scope) if scope.active.get() => {
            scope.cleanups.borrow_mut().push(Box::new(f));
            true
        }
        _ => {
            tracing::warn!("on_scope_dispose called without an active effect scope");
            false
        }
    }
}
