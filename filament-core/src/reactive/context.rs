//! Tracking Context
//!
//! The tracking context records which computation is currently running.
//! This enables automatic dependency registration: when a cell is read,
//! the current computation is registered as a dependent of that cell.
//!
//! # Implementation
//!
//! We use a thread-local stack of computations. When a computation's body
//! runs, the computation is pushed onto the stack; when the body returns
//! (or panics), it is popped. This supports nested computations: the
//! innermost running computation is the one that cell reads register.
//!
//! Alongside the stack lives the ambient context slot: an arbitrary value
//! implicitly available to code running inside a computation. A computed
//! cell captures the ambient value at construction time and reinstalls it
//! around every producer run, so the producer observes the same ambient
//! context on a re-run as it did when it was first set up.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use super::computation::{Computation, ComputationId};

/// The ambient value propagated across computation re-runs.
///
/// Stored type-erased; consumers downcast to the concrete type they
/// installed.
pub type AmbientContext = Arc<dyn Any + Send + Sync>;

thread_local! {
    /// Stack of currently running computations. The last entry is the one
    /// that cell reads register against.
    static COMPUTATION_STACK: RefCell<Vec<Computation>> = RefCell::new(Vec::new());

    /// The currently installed ambient context, if any.
    static AMBIENT: RefCell<Option<AmbientContext>> = RefCell::new(None);
}

/// Check if a computation is currently running on this thread.
pub(crate) fn is_active() -> bool {
    COMPUTATION_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Get the currently running computation, if any.
pub(crate) fn current() -> Option<Computation> {
    COMPUTATION_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Run `f` with dependency tracking suspended.
///
/// Cell reads inside `f` register nothing, even when called from inside a
/// running computation. The stack is restored afterwards, including on
/// panic.
pub(crate) fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let parked = COMPUTATION_STACK.with(|stack| std::mem::take(&mut *stack.borrow_mut()));
    let _scope = UntrackedScope { parked };
    f()
}

/// Read the currently installed ambient context.
pub(crate) fn ambient() -> Option<AmbientContext> {
    AMBIENT.with(|slot| slot.borrow().clone())
}

/// Run `f` with the given ambient context installed, restoring the
/// previous one afterwards (including on panic).
pub(crate) fn with_ambient<R>(context: Option<AmbientContext>, f: impl FnOnce() -> R) -> R {
    let previous = AMBIENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), context));
    let _scope = AmbientScope { previous };
    f()
}

/// Guard that pops the computation stack when dropped.
///
/// Ensures the stack is properly maintained even if the body panics.
pub(crate) struct ComputationScope {
    id: ComputationId,
}

impl ComputationScope {
    /// Push a computation onto the tracking stack for the duration of the
    /// returned guard.
    pub(crate) fn enter(computation: Computation) -> Self {
        let id = computation.id();
        COMPUTATION_STACK.with(|stack| stack.borrow_mut().push(computation));
        Self { id }
    }
}

impl Drop for ComputationScope {
    fn drop(&mut self) {
        COMPUTATION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Catch mismatched push/pop pairs early.
            if let Some(computation) = popped {
                debug_assert_eq!(
                    computation.id(),
                    self.id,
                    "tracking scope mismatch: expected {:?}, got {:?}",
                    self.id,
                    computation.id()
                );
            }
        });
    }
}

/// Restores the parked computation stack when an untracked section ends.
struct UntrackedScope {
    parked: Vec<Computation>,
}

impl Drop for UntrackedScope {
    fn drop(&mut self) {
        let parked = std::mem::take(&mut self.parked);
        COMPUTATION_STACK.with(|stack| *stack.borrow_mut() = parked);
    }
}

/// Restores the previous ambient context when the scope ends.
struct AmbientScope {
    previous: Option<AmbientContext>,
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
