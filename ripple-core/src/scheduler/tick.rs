//! Next Tick
//!
//! [`next_tick`] returns a future that resolves once the pending flush (or,
//! if none is pending, a newly requested one) has completed, so writes made
//! before awaiting it are reflected in every queued job's output.
//!
//! Without a flush hook nothing else drains the queue, so polling the future
//! runs the pending flush inline. With [`spawn_local_flush_hook`] installed
//! the spawned task usually gets there first and the future just waits.
//!
//! [`spawn_local_flush_hook`]: super::spawn_local_flush_hook

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::queue::{
    flush_jobs, has_pending_flush, is_flushing, queue_flush, register_tick_callback,
    register_tick_waiter,
};

/// Future returned by [`next_tick`] and [`next_tick_with`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct NextTick {
    rx: oneshot::Receiver<()>,
}

impl NextTick {
    fn register() -> Self {
        let rx = register_tick_waiter();
        if !is_flushing() {
            queue_flush();
        }
        Self { rx }
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        // A dropped sender means the queue is gone; there is nothing to wait for.
        if Pin::new(&mut this.rx).poll(cx).is_ready() {
            return Poll::Ready(());
        }
        if has_pending_flush() && !is_flushing() {
            flush_jobs();
            return Pin::new(&mut this.rx).poll(cx).map(|_| ());
        }
        Poll::Pending
    }
}

/// Resolve after the next flush completes.
pub fn next_tick() -> NextTick {
    NextTick::register()
}

/// Run `callback` after the next flush completes, and resolve after it.
pub fn next_tick_with<F>(callback: F) -> NextTick
where
    F: FnOnce() + 'static,
{
    register_tick_callback(Box::new(callback));
    NextTick::register()
}
