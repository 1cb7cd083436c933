//! Dependency Registries
//!
//! A Dependency is the per-cell registry of the computations that read the
//! cell. Each reactive container owns exactly one; registries are never
//! shared between containers.
//!
//! # How Registration Works
//!
//! 1. `depend` registers the currently running computation. Registration
//!    is idempotent within a run: a computation that reads the same cell
//!    ten times is registered once.
//!
//! 2. Registration is self-cleaning. Each entry installs an invalidation
//!    hook on the computation that removes the entry again, so after a
//!    computation is invalidated its next run re-registers only the
//!    dependencies it still reads.
//!
//! 3. `changed` snapshots the registry and invalidates each dependent.
//!    Because invalidation is edge-triggered on the computation, each
//!    dependent is invalidated at most once per change no matter how many
//!    registries it appears in.
//!
//! The snapshot is taken before any callback runs so no lock is held while
//! dependents are invalidated; hooks are free to re-enter the registry.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::computation::{Computation, ComputationId};
use super::context;

type DependentMap = IndexMap<ComputationId, Computation>;

/// Per-cell registry of dependent computations.
///
/// Insertion order is preserved, so dependents are invalidated in the
/// order they first read the cell.
#[derive(Clone)]
pub struct Dependency {
    dependents: Arc<Mutex<DependentMap>>,
}

impl Dependency {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            dependents: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Register the currently running computation as a dependent.
    ///
    /// Returns `true` if a new registration occurred, `false` if the
    /// computation was already registered or no computation is active.
    pub fn depend(&self) -> bool {
        match context::current() {
            Some(computation) => self.depend_on(&computation),
            None => false,
        }
    }

    /// Register a specific computation as a dependent.
    ///
    /// An invalidated computation is not registered: its pending re-run
    /// will register afresh against whatever it still reads.
    pub fn depend_on(&self, computation: &Computation) -> bool {
        if computation.is_invalidated() {
            return false;
        }
        let id = computation.id();
        {
            let mut dependents = self.dependents.lock();
            if dependents.contains_key(&id) {
                return false;
            }
            dependents.insert(id, computation.clone());
        }

        // Self-cleaning: drop the registration on invalidation so a re-run
        // starts from a clean slate. Holds only a weak reference to the
        // registry, so a dropped cell does not keep entries alive.
        let dependents = Arc::downgrade(&self.dependents);
        computation.on_invalidate(move |_| {
            if let Some(dependents) = dependents.upgrade() {
                dependents.lock().shift_remove(&id);
            }
        });
        true
    }

    /// Invalidate every registered dependent.
    pub fn changed(&self) {
        let dependents: SmallVec<[Computation; 4]> =
            self.dependents.lock().values().cloned().collect();
        if dependents.is_empty() {
            return;
        }
        trace!(count = dependents.len(), "invalidating dependents");
        for computation in dependents {
            computation.invalidate();
        }
    }

    /// Whether any computation currently depends on this registry.
    pub fn has_dependents(&self) -> bool {
        !self.dependents.lock().is_empty()
    }

    /// Number of currently registered dependents.
    pub fn dependent_count(&self) -> usize {
        self.dependents.lock().len()
    }
}

impl Default for Dependency {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::Runtime;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn depend_outside_computation_is_a_noop() {
        let dependency = Dependency::new();
        assert!(!dependency.depend());
        assert!(!dependency.has_dependents());
    }

    #[test]
    fn depend_registers_once_per_run() {
        let dependency = Dependency::new();
        let registrations = Arc::new(Mutex::new(Vec::new()));

        let registrations_clone = registrations.clone();
        let dependency_clone = dependency.clone();
        let computation = Runtime::autorun(move |_| {
            let first = dependency_clone.depend();
            let second = dependency_clone.depend();
            registrations_clone.lock().push((first, second));
        });

        assert_eq!(*registrations.lock(), vec![(true, false)]);
        assert_eq!(dependency.dependent_count(), 1);

        // A re-run starts from a clean slate and re-registers.
        dependency.changed();
        Runtime::flush();
        assert_eq!(*registrations.lock(), vec![(true, false), (true, false)]);
        assert_eq!(dependency.dependent_count(), 1);

        computation.stop();
    }

    #[test]
    fn changed_invalidates_each_dependent_once() {
        let dependency = Dependency::new();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let dependency_clone = dependency.clone();
        let computation = Runtime::autorun(move |_| {
            dependency_clone.depend();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Two change notifications before the flush coalesce into one
        // re-run; the first invalidation already emptied the registry.
        dependency.changed();
        dependency.changed();
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        computation.stop();
    }

    #[test]
    fn invalidation_unregisters_dependents() {
        let dependency = Dependency::new();

        let dependency_clone = dependency.clone();
        let computation = Runtime::autorun(move |_| {
            dependency_clone.depend();
        });

        assert!(dependency.has_dependents());
        computation.invalidate();
        assert!(!dependency.has_dependents());

        computation.stop();
    }

    #[test]
    fn stopped_dependents_never_come_back() {
        let dependency = Dependency::new();

        let dependency_clone = dependency.clone();
        let computation = Runtime::autorun(move |_| {
            dependency_clone.depend();
        });

        computation.stop();
        assert!(!dependency.has_dependents());

        dependency.changed();
        Runtime::flush();
        assert!(!dependency.has_dependents());
    }
}
