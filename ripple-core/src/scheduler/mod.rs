//! Job Scheduler
//!
//! Deferred effects do not re-run when a dependency changes; they queue a
//! [`Job`] instead. The scheduler collects queued jobs and runs them in one
//! flush, in a fixed order, followed by post-flush callbacks.
//!
//! Everything here is per thread and synchronous. The only suspension point
//! is between queueing and flushing, which the host controls through a
//! flush hook, an explicit [`flush_jobs`] call, or awaiting [`next_tick`].

mod job;
mod queue;
mod tick;

pub use job::{Job, JobId, JobOptions};
pub use queue::{
    clear_flush_hook, flush_jobs, has_pending_flush, invalidate_job, is_flushing,
    queue_job, queue_post_flush_cb, queued_effect, set_flush_hook, spawn_local_flush_hook,
    FlushOutcome, QueuedEffect,
};
pub use tick::{next_tick, next_tick_with, NextTick};
