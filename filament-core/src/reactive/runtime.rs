//! Reactive Runtime
//!
//! The runtime is the engine surface the reactive containers consume: it
//! answers whether a computation is currently running, creates auto-
//! rerunning computations, drives the flush pass, and scopes the ambient
//! context.
//!
//! # How It Works
//!
//! 1. `autorun` runs its body once immediately. Every cell read during the
//!    run registers the computation with that cell's dependency registry.
//!
//! 2. When any of those cells changes, the computation is invalidated and
//!    queued. `flush` re-runs everything queued, re-establishing
//!    dependencies as the bodies run.
//!
//! 3. A computation created while another is running is nested under it:
//!    invalidating or stopping the parent stops the child. The parent's
//!    next run creates fresh children.
//!
//! # Thread Model
//!
//! Handles and values are `Send + Sync` and may move across threads, but
//! tracking and flushing are per-thread cooperative: a computation re-runs
//! on the thread that flushes, and there is no cross-thread invalidation
//! propagation.

use tracing::trace;

use super::computation::Computation;
use super::context::{self, AmbientContext};
use super::error::ReactiveError;
use super::scheduler;

/// The ambient reactive runtime.
///
/// A namespace for the engine operations; all state lives in thread-local
/// storage.
pub struct Runtime;

impl Runtime {
    /// Check if a computation is currently running on this thread.
    pub fn active() -> bool {
        context::is_active()
    }

    /// Get the currently running computation, if any.
    pub fn current() -> Option<Computation> {
        context::current()
    }

    /// Create a computation that runs `body` once immediately and again
    /// after any dependency registered during its last run changes.
    ///
    /// Re-runs happen during [`Runtime::flush`], not inside the write that
    /// invalidated the computation. If another computation is running,
    /// the new one nests under it and is stopped when the enclosing
    /// computation is invalidated or stopped.
    ///
    /// A panic from the first run propagates to the caller after stopping
    /// the computation; panics from later runs propagate out of the flush
    /// that triggered them.
    pub fn autorun<F>(body: F) -> Computation
    where
        F: FnMut(&Computation) + Send + 'static,
    {
        Self::spawn(body, false)
    }

    /// `autorun` with control over the system flag; used by reactive
    /// containers that manage a computation internally.
    pub(crate) fn spawn<F>(body: F, system: bool) -> Computation
    where
        F: FnMut(&Computation) + Send + 'static,
    {
        let parent = context::current();
        let computation = Computation::new(body, system);
        trace!(id = %computation.id(), system, nested = parent.is_some(), "computation started");
        computation.run_first();

        // Standard nesting rule: the child's lifetime is bounded by the
        // enclosing computation's current run.
        if let Some(parent) = parent {
            let child = computation.clone();
            parent.on_invalidate(move |_| child.stop());
        }
        computation
    }

    /// Re-run every invalidated computation queued on this thread.
    ///
    /// Computations invalidated during the pass are processed in the same
    /// pass. Returns an error when called re-entrantly or from inside a
    /// running computation.
    pub fn try_flush() -> Result<(), ReactiveError> {
        scheduler::flush()
    }

    /// Like [`Runtime::try_flush`], but panics on misuse. Flushing from
    /// inside a computation or an in-progress flush is a programming error
    /// in a cooperative scheduler.
    pub fn flush() {
        if let Err(error) = scheduler::flush() {
            panic!("{error}");
        }
    }

    /// Run `f` with dependency tracking suspended: cell reads inside `f`
    /// register nothing.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        context::untracked(f)
    }

    /// Run `f` with the given ambient context installed, restoring the
    /// previous one afterward.
    pub fn with_ambient<R>(ambient: Option<AmbientContext>, f: impl FnOnce() -> R) -> R {
        context::with_ambient(ambient, f)
    }

    /// Read the currently installed ambient context.
    pub fn ambient() -> Option<AmbientContext> {
        context::ambient()
    }
}
