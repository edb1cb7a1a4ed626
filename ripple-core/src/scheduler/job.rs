//! Scheduler Jobs
//!
//! A [`Job`] is a unit of deferred work. Cloning a job clones the handle;
//! all clones share one queue membership flag, so queueing the same job
//! any number of times before a flush runs it once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordering options for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Position in the flush: lower runs first, `None` runs after all others.
    pub order: Option<u64>,
    /// Run before non-pre jobs with the same order.
    pub pre: bool,
}

/// A deduplicated unit of deferred work.
#[derive(Clone)]
pub struct Job {
    inner: Rc<JobInner>,
}

struct JobInner {
    id: JobId,
    order: Option<u64>,
    pre: bool,
    active: Cell<bool>,
    queued: Cell<bool>,
    func: RefCell<Box<dyn FnMut()>>,
}

impl Job {
    /// A job that runs after every ordered job.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(JobOptions::default(), f)
    }

    /// A job positioned by `order`, typically the owning unit's creation id.
    pub fn with_order<F>(order: u64, f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(
            JobOptions {
                order: Some(order),
                pre: false,
            },
            f,
        )
    }

    pub fn with_options<F>(options: JobOptions, f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self {
            inner: Rc::new(JobInner {
                id: JobId::new(),
                order: options.order,
                pre: options.pre,
                active: Cell::new(true),
                queued: Cell::new(false),
                func: RefCell::new(Box::new(f)),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn order(&self) -> Option<u64> {
        self.inner.order
    }

    pub fn is_pre(&self) -> bool {
        self.inner.pre
    }

    /// Prevent the job from running again. Queued copies are skipped.
    pub fn cancel(&self) {
        self.inner.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Whether the job is waiting in the main queue.
    pub fn is_queued(&self) -> bool {
        self.inner.queued.get()
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.inner.queued.set(queued);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sort key within a flush: ordered jobs ascending, pre before non-pre.
    pub(crate) fn sort_key(&self) -> (u64, bool) {
        (self.inner.order.unwrap_or(u64::MAX), !self.inner.pre)
    }

    /// Run the job body. A job re-entered from its own body is skipped.
    pub(crate) fn call(&self) {
        if let Ok(mut func) = self.inner.func.try_borrow_mut() {
            (*func)();
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("order", &self.inner.order)
            .field("pre", &self.inner.pre)
            .field("active", &self.is_active())
            .field("queued", &self.is_queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        let a = Job::new(|| {});
        let b = Job::new(|| {});
        assert_ne!(a.id(), b.id());
        assert!(a.id() < b.id());
        assert_eq!(JobId::from(7).to_string(), "#7");
    }

    #[test]
    fn clones_share_state() {
        let job = Job::new(|| {});
        let copy = job.clone();
        copy.set_queued(true);
        assert!(job.is_queued());
        job.cancel();
        assert!(!copy.is_active());
        assert!(job.ptr_eq(&copy));
    }

    #[test]
    fn sort_key_orders_pre_first_and_unordered_last() {
        let plain = Job::with_order(3, || {});
        let pre = Job::with_options(JobOptions { order: Some(3), pre: true }, || {});
        let unordered = Job::new(|| {});

        assert!(pre.sort_key() < plain.sort_key());
        assert!(plain.sort_key() < unordered.sort_key());
    }

    #[test]
    fn call_runs_the_body() {
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let job = Job::new(move || counter.set(counter.get() + 1));
        job.call();
        job.call();
        assert_eq!(hits.get(), 2);
    }
}
