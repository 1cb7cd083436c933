//! Flush Scheduler
//!
//! Invalidated computations do not re-run inside the write that invalidated
//! them; they are parked in a queue and re-run together in the next flush
//! pass. This is what coalesces updates: several writes landing before a
//! flush invalidate a shared dependent once, and the dependent re-runs once.
//!
//! # The flush pass
//!
//! 1. Pop the next queued computation.
//! 2. Skip it if it was stopped, or if it already re-ran (the invalidated
//!    flag is the source of truth, not queue membership).
//! 3. Re-run it. Anything it invalidates in turn joins the same pass.
//! 4. Repeat until the queue is empty.
//!
//! The queue is thread-local: computations re-run on the thread that
//! flushes, and flushing is strictly cooperative — a flush cannot be
//! started from inside a computation or from inside another flush.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use tracing::trace;

use super::computation::Computation;
use super::context;
use super::error::ReactiveError;

thread_local! {
    /// Computations waiting to be re-run by the next flush pass.
    static PENDING: RefCell<VecDeque<Computation>> = RefCell::new(VecDeque::new());

    /// Whether a flush pass is currently draining the queue.
    static FLUSHING: Cell<bool> = Cell::new(false);
}

/// Park a computation for the next flush pass.
///
/// Called by `Computation::invalidate`; the edge-triggered invalidated
/// flag guarantees a computation is enqueued at most once per run.
pub(crate) fn enqueue(computation: Computation) {
    trace!(id = %computation.id(), "computation queued for next flush");
    PENDING.with(|queue| queue.borrow_mut().push_back(computation));
}

/// Drain the queue, re-running every computation that is still invalidated
/// and not stopped. Chained invalidations are processed in the same pass.
pub(crate) fn flush() -> Result<(), ReactiveError> {
    if FLUSHING.with(|flushing| flushing.get()) {
        return Err(ReactiveError::FlushInProgress);
    }
    if context::is_active() {
        return Err(ReactiveError::FlushWithinComputation);
    }

    FLUSHING.with(|flushing| flushing.set(true));
    let _guard = FlushGuard;

    let mut reruns = 0usize;
    loop {
        let next = PENDING.with(|queue| queue.borrow_mut().pop_front());
        let Some(computation) = next else { break };
        if computation.is_stopped() || !computation.is_invalidated() {
            continue;
        }
        computation.recompute();
        reruns += 1;
    }
    trace!(reruns, "flush pass complete");
    Ok(())
}

/// Number of computations currently parked for the next flush.
#[cfg(test)]
pub(crate) fn pending_count() -> usize {
    PENDING.with(|queue| queue.borrow().len())
}

/// Clears the flushing flag when the pass ends, including when a re-run
/// panics out of the loop.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|flushing| flushing.set(false));
    }
}
