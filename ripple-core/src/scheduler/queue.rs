//! Job Queue
//!
//! The queue collects jobs queued by deferred effects and drains them in one
//! pass, so a burst of synchronous writes results in each affected job
//! running once.
//!
//! # Algorithm
//!
//! 1. `queue_job` inserts a job into the main queue, keeping it sorted by
//!    order (pre jobs ahead of others with the same order, unordered jobs
//!    last). A job that is already queued is ignored.
//!
//! 2. The first job queued after a flush asks the host to schedule one,
//!    through the flush hook if one is installed.
//!
//! 3. `flush_jobs` drains the main queue. Each job's queued flag is cleared
//!    before it runs, so a job may queue itself again; jobs queued during the
//!    flush are inserted past the current position and still run in it.
//!
//! 4. Post-flush callbacks run once the main queue is empty. If they queue
//!    more work, the whole pass repeats.
//!
//! 5. Tick waiters registered before or during the flush are resolved.
//!
//! A job that runs more than the configured recursion limit within one flush
//! is reported as runaway and skipped for the rest of that flush.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tokio::sync::oneshot;

use super::job::{Job, JobId};
use crate::config;
use crate::error::{report, ReactiveError};
use crate::reactive::{Effect, EffectInner, EffectOptions};

type FlushHook = Rc<dyn Fn()>;

#[derive(Default)]
struct JobQueue {
    queue: Vec<Job>,
    /// Index of the next main-queue job to run while flushing.
    flush_index: usize,
    flushing: bool,
    flush_pending: bool,
    pending_post: Vec<Job>,
    tick_waiters: Vec<oneshot::Sender<()>>,
    tick_callbacks: Vec<Box<dyn FnOnce()>>,
    flush_hook: Option<FlushHook>,
}

thread_local! {
    static QUEUE: RefCell<JobQueue> = RefCell::new(JobQueue::default());
}

/// Result of one call to [`flush_jobs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Jobs and post-flush callbacks that ran.
    pub executed: usize,
    /// Errors reported while flushing.
    pub errors: Vec<ReactiveError>,
}

impl FlushOutcome {
    /// Whether nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Queue `job` for the next flush. Already-queued and cancelled jobs are
/// ignored.
pub fn queue_job(job: &Job) {
    if job.is_queued() || !job.is_active() {
        return;
    }
    job.set_queued(true);

    QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let start = if q.flushing {
            q.flush_index.min(q.queue.len())
        } else {
            0
        };
        let key = job.sort_key();
        let pos = start + q.queue[start..].partition_point(|queued| queued.sort_key() <= key);
        q.queue.insert(pos, job.clone());
    });

    queue_flush();
}

/// Queue `job` to run after the main queue of the next flush.
pub fn queue_post_flush_cb(job: &Job) {
    if !job.is_active() {
        return;
    }
    let added = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.pending_post.iter().any(|queued| queued.ptr_eq(job)) {
            return false;
        }
        q.pending_post.push(job.clone());
        true
    });
    if added {
        queue_flush();
    }
}

/// Remove `job` from the main queue if it has not run yet.
pub fn invalidate_job(job: &Job) {
    QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let start = if q.flushing { q.flush_index } else { 0 };
        if let Some(offset) = q.queue.iter().skip(start).position(|queued| queued.ptr_eq(job)) {
            q.queue.remove(start + offset);
            job.set_queued(false);
        }
    });
}

/// Ask the host for a flush unless one is already pending or running.
pub(crate) fn queue_flush() {
    let hook = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.flushing || q.flush_pending {
            return None;
        }
        q.flush_pending = true;
        q.flush_hook.clone()
    });
    if let Some(hook) = hook {
        hook();
    }
}

/// Whether work is waiting for a flush that has not started.
pub fn has_pending_flush() -> bool {
    QUEUE.with(|q| q.borrow().flush_pending)
}

/// Whether a flush is in progress.
pub fn is_flushing() -> bool {
    QUEUE.with(|q| q.borrow().flushing)
}

/// Install the callback that schedules a flush on the host's event loop.
///
/// It is called once each time the queue goes from idle to pending. The
/// hook should arrange for [`flush_jobs`] to run soon, but not inline.
pub fn set_flush_hook<F>(hook: F)
where
    F: Fn() + 'static,
{
    let hook: FlushHook = Rc::new(hook);
    let pending = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        q.flush_hook = Some(hook.clone());
        q.flush_pending
    });
    if pending {
        hook();
    }
}

/// Remove the flush hook. Flushes then happen only when the host calls
/// [`flush_jobs`] or awaits [`next_tick`](super::next_tick).
pub fn clear_flush_hook() {
    QUEUE.with(|q| q.borrow_mut().flush_hook = None);
}

/// Flush on the current `tokio::task::LocalSet` whenever work is queued.
///
/// Queueing a job outside a `LocalSet` after this is installed panics.
pub fn spawn_local_flush_hook() {
    set_flush_hook(|| {
        tokio::task::spawn_local(async {
            flush_jobs();
        });
    });
}

pub(crate) fn register_tick_waiter() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    QUEUE.with(|q| q.borrow_mut().tick_waiters.push(tx));
    rx
}

pub(crate) fn register_tick_callback(cb: Box<dyn FnOnce()>) {
    QUEUE.with(|q| q.borrow_mut().tick_callbacks.push(cb));
}

/// Resets the flushing state, keeping unrun jobs queued if a job unwound.
struct Flushing;

impl Drop for Flushing {
    fn drop(&mut self) {
        let _ = QUEUE.try_with(|q| {
            let mut q = q.borrow_mut();
            let ran = q.flush_index.min(q.queue.len());
            q.queue.drain(..ran);
            q.flush_index = 0;
            q.flushing = false;
            if !q.queue.is_empty() || !q.pending_post.is_empty() {
                q.flush_pending = true;
            }
        });
    }
}

#[derive(Default)]
struct RecursionGuard {
    limit: u32,
    counts: HashMap<JobId, u32>,
    halted: HashSet<JobId>,
}

impl RecursionGuard {
    /// Count a run of `job`, returning the error the first time it exceeds
    /// the limit. Halted jobs return `Err(None)` on later attempts.
    fn check(&mut self, job: &Job) -> Result<(), Option<ReactiveError>> {
        let id = job.id();
        if self.halted.contains(&id) {
            return Err(None);
        }
        let count = self.counts.entry(id).or_insert(0);
        *count += 1;
        if *count > self.limit {
            self.halted.insert(id);
            return Err(Some(ReactiveError::RecursionLimitExceeded {
                job: id,
                limit: self.limit,
            }));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_job(job: &Job, catch_panics: bool, guard: &mut RecursionGuard, outcome: &mut FlushOutcome) {
    if !job.is_active() {
        tracing::debug!(job = %job.id(), "skipping cancelled job");
        return;
    }
    match guard.check(job) {
        Ok(()) => {}
        Err(Some(err)) => {
            report(&err);
            outcome.errors.push(err);
            return;
        }
        Err(None) => {
            tracing::debug!(job = %job.id(), "skipping halted job");
            return;
        }
    }

    outcome.executed += 1;
    if !catch_panics {
        job.call();
        return;
    }
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.call())) {
        let err = ReactiveError::JobPanicked {
            job: job.id(),
            message: panic_message(payload.as_ref()),
        };
        report(&err);
        outcome.errors.push(err);
    }
}

/// Drain the main queue, then post-flush callbacks, until both are empty.
///
/// Calling this while a flush is already running does nothing.
pub fn flush_jobs() -> FlushOutcome {
    let started = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.flushing {
            return false;
        }
        q.flushing = true;
        q.flush_pending = false;
        true
    });
    if !started {
        tracing::debug!("flush already in progress");
        return FlushOutcome::default();
    }

    let flushing = Flushing;
    let config = config::current();
    let mut guard = RecursionGuard {
        limit: config.recursion_limit,
        ..RecursionGuard::default()
    };
    let mut outcome = FlushOutcome::default();
    tracing::trace!("flush start");

    loop {
        QUEUE.with(|q| q.borrow_mut().queue.sort_by_key(Job::sort_key));

        loop {
            let next = QUEUE.with(|q| {
                let mut q = q.borrow_mut();
                let job = q.queue.get(q.flush_index).cloned();
                if job.is_some() {
                    q.flush_index += 1;
                }
                job
            });
            let Some(job) = next else { break };
            job.set_queued(false);
            run_job(&job, config.catch_job_panics, &mut guard, &mut outcome);
        }

        QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            q.queue.clear();
            q.flush_index = 0;
        });

        let mut post = QUEUE.with(|q| std::mem::take(&mut q.borrow_mut().pending_post));
        post.sort_by_key(Job::sort_key);
        for job in &post {
            run_job(job, config.catch_job_panics, &mut guard, &mut outcome);
        }

        let drained = QUEUE.with(|q| {
            let q = q.borrow();
            q.queue.is_empty() && q.pending_post.is_empty()
        });
        if drained {
            break;
        }
    }

    drop(flushing);
    tracing::trace!(
        executed = outcome.executed,
        errors = outcome.errors.len(),
        "flush end"
    );

    let (waiters, callbacks) = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        (
            std::mem::take(&mut q.tick_waiters),
            std::mem::take(&mut q.tick_callbacks),
        )
    });
    for callback in callbacks {
        callback();
    }
    for waiter in waiters {
        // The receiver may have been dropped; nobody is waiting then.
        let _ = waiter.send(());
    }

    outcome
}

/// A deferred effect paired with the job that re-runs it.
///
/// This is the shape a renderer uses for each updatable unit: the effect
/// runs once immediately, and later triggers queue its job instead of
/// re-running inline, so a burst of writes causes one update per flush.
#[derive(Debug, Clone)]
pub struct QueuedEffect {
    effect: Effect,
    job: Job,
}

impl QueuedEffect {
    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Stop the effect and cancel its job.
    pub fn stop(&self) {
        self.effect.stop();
    }
}

/// Create a [`QueuedEffect`] ordered by `order` within each flush.
pub fn queued_effect<F>(order: u64, f: F) -> QueuedEffect
where
    F: FnMut() + 'static,
{
    let target: Rc<RefCell<Weak<EffectInner>>> = Rc::new(RefCell::new(Weak::new()));
    let runner = target.clone();
    let job = Job::with_order(order, move || {
        let effect = runner.borrow().upgrade();
        if let Some(effect) = effect {
            effect.run();
        }
    });

    let queued = job.clone();
    let cancelled = job.clone();
    let effect = Effect::with_options(
        f,
        EffectOptions::new()
            .scheduler(move || queue_job(&queued))
            .on_stop(move || cancelled.cancel()),
    );
    *target.borrow_mut() = Rc::downgrade(effect.inner());

    QueuedEffect { effect, job }
}
