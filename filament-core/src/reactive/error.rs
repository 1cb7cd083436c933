//! Error types for the reactive runtime.

use thiserror::Error;

/// Errors surfaced by the reactive runtime.
///
/// Failures originating in user code (a panicking equality predicate or
/// producer function) are not represented here: they propagate unmodified
/// as panics from the call that invoked them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed cell was constructed with no computation active.
    ///
    /// A computed cell nests its refreshing computation under the one that
    /// is currently running, so it can only be built from inside one.
    #[error("computed cell requires an enclosing computation")]
    NoEnclosingComputation,

    /// A flush was requested while a flush pass was already running.
    #[error("flush requested while a flush pass is already running")]
    FlushInProgress,

    /// A flush was requested from inside a running computation.
    #[error("cannot flush from inside a running computation")]
    FlushWithinComputation,
}
