//! Error Reporting
//!
//! Misuse of the reactive API (writing through a readonly wrapper, assigning
//! to a computed without a setter) and failures inside scheduled jobs are
//! surfaced as [`ReactiveError`] values.
//!
//! Every error is routed through [`report`], which logs it with `tracing`
//! and then hands it to the host's error handler, if one is installed. The
//! handler is per thread, like the rest of the reactive state.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::reactive::SubscriberId;
use crate::scheduler::JobId;

/// Errors produced by the reactivity engine and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A write went through a readonly wrapper.
    #[error("set operation on key \"{key}\" failed: target is readonly")]
    ReadonlyMutation {
        /// The key that was written.
        key: String,
    },

    /// A delete went through a readonly wrapper.
    #[error("delete operation on key \"{key}\" failed: target is readonly")]
    ReadonlyDelete {
        /// The key that was deleted.
        key: String,
    },

    /// A computed value without a setter was assigned to.
    #[error("write operation failed: computed value is readonly")]
    ReadonlyComputed,

    /// An array was accessed with a key that is neither an index nor `length`.
    #[error("invalid array key \"{key}\"")]
    InvalidArrayKey {
        /// The offending key.
        key: String,
    },

    /// An array's length was set to something other than a non-negative integer.
    #[error("invalid array length {value}")]
    InvalidArrayLength {
        /// The rejected value, formatted.
        value: String,
    },

    /// An array-only operation was used on an object wrapper.
    #[error("{operation} requires an array target")]
    NotAnArray {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A computation re-entered itself while it was still running.
    #[error("cyclic dependency: effect {effect} was re-entered while running")]
    CyclicDependency {
        /// The effect that was re-entered.
        effect: SubscriberId,
    },

    /// A job kept re-queueing itself within a single flush.
    #[error("maximum recursive updates exceeded: job {job} ran more than {limit} times in one flush")]
    RecursionLimitExceeded {
        /// The runaway job.
        job: JobId,
        /// The configured per-flush limit.
        limit: u32,
    },

    /// A scheduled job panicked during a flush.
    #[error("job {job} panicked: {message}")]
    JobPanicked {
        /// The job that panicked.
        job: JobId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// `run` was called on a scope that has already been stopped.
    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    /// A runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    /// Fatal errors indicate broken work rather than a rejected operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RecursionLimitExceeded { .. } | Self::JobPanicked { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

thread_local! {
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install the host's error handler for the current thread.
///
/// The handler is called after the error has been logged. It replaces any
/// previously installed handler.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&ReactiveError) + 'static,
{
    ERROR_HANDLER.with(|slot| *slot.borrow_mut() = Some(Rc::new(handler)));
}

/// Remove the current thread's error handler.
pub fn clear_error_handler() {
    ERROR_HANDLER.with(|slot| slot.borrow_mut().take());
}

/// Report an error through the logging and handler channels.
pub fn report(error: &ReactiveError) {
    if error.is_fatal() {
        tracing::error!(%error, "reactive runtime error");
    } else {
        tracing::warn!(%error, "reactive runtime misuse");
    }

    // Clone the handler out so it may install another one while running.
    let handler = ERROR_HANDLER
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten();
    if let Some(handler) = handler {
        handler(error);
    }
}

/// Report a rejected operation and hand the error back for returning.
pub(crate) fn misuse(error: ReactiveError) -> ReactiveError {
    report(&error);
    error
}
