//! Computation Handles
//!
//! A Computation is a unit of reactive work: a function that runs once
//! immediately and re-runs whenever one of the reactive values it read
//! during its last run changes.
//!
//! # How Computations Work
//!
//! 1. While a computation's body runs, it sits on the thread-local tracking
//!    stack. Any cell read during that time registers the computation as a
//!    dependent.
//!
//! 2. When a dependency changes, the computation is invalidated: it is
//!    enqueued for the next flush pass and its invalidation hooks fire.
//!    Invalidation is edge-triggered, so a computation is invalidated at
//!    most once between runs no matter how many of its sources change.
//!
//! 3. The flush pass re-runs each invalidated computation. The invalidated
//!    flag is cleared before the body runs, so a write that lands during
//!    the run re-invalidates it.
//!
//! 4. Stopping a computation is one-way. A stopped computation never runs
//!    again, and because stopping invalidates it, every dependency registry
//!    holding it drops its entry.
//!
//! # Nesting
//!
//! A computation created while another is running is a child of that
//! computation: when the parent is invalidated or stopped, the child is
//! stopped. The parent re-creates its children on its next run. See
//! [`Runtime::autorun`](super::runtime::Runtime::autorun).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::ComputationScope;
use super::scheduler;

/// Counter for generating unique computation IDs.
static COMPUTATION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a computation.
///
/// Used as the key in dependency registries to keep registration idempotent
/// within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    fn next() -> Self {
        Self(COMPUTATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Body = Box<dyn FnMut(&Computation) + Send>;
type Hook = Box<dyn FnOnce(&Computation) + Send>;

/// A reactive computation that re-runs when its dependencies change.
///
/// Handles are cheap to clone and share state; stopping one clone stops
/// them all. Computations are created through
/// [`Runtime::autorun`](super::runtime::Runtime::autorun).
pub struct Computation {
    /// Unique identifier for this computation.
    id: ComputationId,

    /// The body function, invoked with this handle on every run.
    body: Arc<Mutex<Body>>,

    /// Whether the computation has been stopped (one-way).
    stopped: Arc<AtomicBool>,

    /// Whether the computation is pending a re-run.
    invalidated: Arc<AtomicBool>,

    /// True only while the first run is in progress.
    first_run: Arc<AtomicBool>,

    /// Marks computations created internally on behalf of a reactive
    /// container (for example a computed cell's refresher). A diagnostics
    /// hint only; system computations behave like any other.
    system: bool,

    /// Hooks fired when the computation is next invalidated.
    invalidate_hooks: Arc<Mutex<Vec<Hook>>>,

    /// Hooks fired when the computation is stopped.
    stop_hooks: Arc<Mutex<Vec<Hook>>>,
}

impl Computation {
    /// Create a computation without running it.
    ///
    /// The first run is driven separately so the caller controls what is on
    /// the tracking stack when it happens.
    pub(crate) fn new<F>(body: F, system: bool) -> Self
    where
        F: FnMut(&Computation) + Send + 'static,
    {
        Self {
            id: ComputationId::next(),
            body: Arc::new(Mutex::new(Box::new(body))),
            stopped: Arc::new(AtomicBool::new(false)),
            invalidated: Arc::new(AtomicBool::new(false)),
            first_run: Arc::new(AtomicBool::new(true)),
            system,
            invalidate_hooks: Arc::new(Mutex::new(Vec::new())),
            stop_hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get the computation's unique ID.
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Whether this computation has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether this computation is pending a re-run.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// True only while the first run of the body is in progress.
    pub fn is_first_run(&self) -> bool {
        self.first_run.load(Ordering::SeqCst)
    }

    /// Whether this computation was created internally by a reactive
    /// container rather than directly by a caller.
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Mark this computation as stale and schedule it for the next flush.
    ///
    /// The first invalidation since the last run fires all registered
    /// invalidation hooks and, unless the computation is stopped, enqueues
    /// it for re-running. Further invalidations before the next run are
    /// no-ops.
    pub fn invalidate(&self) {
        if self.invalidated.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(id = %self.id, "computation invalidated");
        if !self.is_stopped() {
            scheduler::enqueue(self.clone());
        }
        let hooks: SmallVec<[Hook; 4]> = self.invalidate_hooks.lock().drain(..).collect();
        for hook in hooks {
            hook(self);
        }
    }

    /// Stop this computation permanently.
    ///
    /// Stopping invalidates the computation (which unregisters it from
    /// every dependency registry) and fires the stop hooks. A stopped
    /// computation never re-runs, but any values it produced remain
    /// readable.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(id = %self.id, "computation stopped");
        self.invalidate();
        let hooks: SmallVec<[Hook; 4]> = self.stop_hooks.lock().drain(..).collect();
        for hook in hooks {
            hook(self);
        }
    }

    /// Register a hook to fire on the next invalidation.
    ///
    /// If the computation is already invalidated (or stopped, which implies
    /// invalidated), the hook fires immediately: registration is never lost
    /// across the invalidation edge.
    pub fn on_invalidate<F>(&self, hook: F)
    where
        F: FnOnce(&Computation) + Send + 'static,
    {
        if self.is_invalidated() {
            hook(self);
            return;
        }
        self.invalidate_hooks.lock().push(Box::new(hook));
    }

    /// Register a hook to fire when the computation is stopped.
    ///
    /// If it is already stopped, the hook fires immediately.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: FnOnce(&Computation) + Send + 'static,
    {
        if self.is_stopped() {
            hook(self);
            return;
        }
        self.stop_hooks.lock().push(Box::new(hook));
    }

    /// Re-run the body if the computation is still invalidated and not
    /// stopped. Called by the flush pass.
    pub(crate) fn recompute(&self) {
        if self.is_stopped() || !self.is_invalidated() {
            return;
        }
        trace!(id = %self.id, "re-running computation");
        self.run();
    }

    /// Drive the first run. A panicking first run stops the computation
    /// before the panic propagates, so no half-alive computation survives a
    /// failed construction.
    pub(crate) fn run_first(&self) {
        let mut guard = FirstRunGuard {
            computation: self,
            completed: false,
        };
        self.run();
        guard.completed = true;
    }

    /// Execute the body with this computation on the tracking stack.
    ///
    /// The invalidated flag is cleared before the body runs: a dependency
    /// change that lands mid-run re-invalidates the computation.
    fn run(&self) {
        self.invalidated.store(false, Ordering::SeqCst);
        let _scope = ComputationScope::enter(self.clone());
        let mut body = self.body.lock();
        (*body)(self);
    }
}

/// Clears the first-run flag when the first run ends, and stops the
/// computation if the body panicked out of it.
struct FirstRunGuard<'a> {
    computation: &'a Computation,
    completed: bool,
}

impl Drop for FirstRunGuard<'_> {
    fn drop(&mut self) {
        self.computation.first_run.store(false, Ordering::SeqCst);
        if !self.completed {
            self.computation.stop();
        }
    }
}

impl Clone for Computation {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            body: Arc::clone(&self.body),
            stopped: Arc::clone(&self.stopped),
            invalidated: Arc::clone(&self.invalidated),
            first_run: Arc::clone(&self.first_run),
            system: self.system,
            invalidate_hooks: Arc::clone(&self.invalidate_hooks),
            stop_hooks: Arc::clone(&self.stop_hooks),
        }
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .field("invalidated", &self.is_invalidated())
            .field("system", &self.system)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
