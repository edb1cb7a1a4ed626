//! Reactive Context
//!
//! The reactive context tracks which effect is currently running, whether
//! reads should be tracked at all, and which effect scope is collecting
//! newly created effects.
//!
//! # Implementation
//!
//! We use a thread-local stack of running effects. Running an effect pushes
//! it onto the stack and the returned guard pops it again, so nested runs
//! (an effect reading a computed whose getter is itself an effect) attribute
//! reads to the innermost computation. Because the guard pops on drop, the
//! stack stays balanced even when a computation panics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::effect::EffectInner;
use super::scope::ScopeInner;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Rc<EffectInner>>> = const { RefCell::new(Vec::new()) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static ACTIVE_SCOPE: RefCell<Option<Rc<ScopeInner>>> = const { RefCell::new(None) };
}

/// Guard that pops the running effect when dropped.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
    prev_should_track: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// While the guard lives, tracked reads subscribe `effect`. Tracking is
    /// re-enabled for the duration even if the caller had paused it.
    pub(crate) fn enter(effect: &Rc<EffectInner>) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Rc::clone(effect)));
        let prev_should_track = SHOULD_TRACK.with(|flag| flag.replace(true));

        Self {
            subscriber_id: effect.id(),
            prev_should_track,
        }
    }

    /// Check if there is a running effect.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the running effect's subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|effect| effect.id()))
    }

    /// The running effect, if reads should currently be attributed to it.
    pub(crate) fn tracking_effect() -> Option<Rc<EffectInner>> {
        if !should_track() {
            return None;
        }
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Whether `id` is the innermost running effect.
    pub(crate) fn is_current(id: SubscriberId) -> bool {
        Self::current_subscriber() == Some(id)
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        SHOULD_TRACK.with(|flag| flag.set(self.prev_should_track));

        if let Some(effect) = popped {
            debug_assert_eq!(
                effect.id(),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id,
                effect.id()
            );
        }
    }
}

/// Whether reads are currently being tracked (as opposed to paused).
pub fn should_track() -> bool {
    SHOULD_TRACK.with(|flag| flag.get())
}

/// Whether a read right now would subscribe a running effect.
pub fn is_tracking() -> bool {
    should_track() && ReactiveContext::is_active()
}

/// Stop tracking reads until the matching [`reset_tracking`].
pub fn pause_tracking() {
    let prev = SHOULD_TRACK.with(|flag| flag.replace(false));
    TRACK_STACK.with(|stack| stack.borrow_mut().push(prev));
}

/// Resume tracking reads until the matching [`reset_tracking`].
pub fn enable_tracking() {
    let prev = SHOULD_TRACK.with(|flag| flag.replace(true));
    TRACK_STACK.with(|stack| stack.borrow_mut().push(prev));
}

/// Restore the tracking state saved by the last pause or enable.
pub fn reset_tracking() {
    let prev = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    SHOULD_TRACK.with(|flag| flag.set(prev.unwrap_or(true)));
}

struct PausedTracking;

impl Drop for PausedTracking {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Run `f` without subscribing the running effect to anything it reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    pause_tracking();
    let _restore = PausedTracking;
    f()
}

/// Guard that restores the previously active scope when dropped.
pub(crate) struct ScopeContext {
    prev: Option<Rc<ScopeInner>>,
}

impl ScopeContext {
    pub(crate) fn enter(scope: Rc<ScopeInner>) -> Self {
        let prev = ACTIVE_SCOPE.with(|slot| slot.borrow_mut().replace(scope));
        Self { prev }
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        let prev = self.prev.take();
        ACTIVE_SCOPE.with(|slot| *slot.borrow_mut() = prev);
    }
}

/// The scope currently collecting new effects, if any.
pub(crate) fn active_scope() -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::EffectOptions;

    fn lazy_effect() -> Rc<EffectInner> {
        EffectInner::new(Box::new(|| {}), EffectOptions::new().lazy(), false)
    }

    #[test]
    fn context_tracks_subscriber() {
        let effect = lazy_effect();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(&effect);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(effect.id()));
            assert!(is_tracking());
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = lazy_effect();
        let inner = lazy_effect();

        {
            let _ctx1 = ReactiveContext::enter(&outer);
            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(&inner);
                assert_eq!(ReactiveContext::current_subscriber(), Some(inner.id()));
            }

            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn untracked_pauses_and_restores() {
        let effect = lazy_effect();
        let _ctx = ReactiveContext::enter(&effect);

        assert!(is_tracking());
        untracked(|| {
            assert!(!is_tracking());
            assert!(ReactiveContext::tracking_effect().is_none());
        });
        assert!(is_tracking());
    }

    #[test]
    fn entering_an_effect_re_enables_tracking() {
        let effect = lazy_effect();
        pause_tracking();
        {
            let _ctx = ReactiveContext::enter(&effect);
            assert!(is_tracking());
        }
        assert!(!should_track());
        reset_tracking();
        assert!(should_track());
    }
}
