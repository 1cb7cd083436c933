//! Reactive Cell Implementation
//!
//! A ReactiveCell is the fundamental reactive value container. It holds a
//! value, registers the currently running computation on every read, and
//! invalidates its dependents on every write that actually changes the
//! value.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a running computation, the cell registers
//!    that computation as a dependent.
//!
//! 2. A write is gated by equality: if the incoming value equals the stored
//!    one, the write is a no-op and nothing downstream re-runs. The first
//!    write of a cell's life always takes effect.
//!
//! 3. An accepted write invalidates every dependent; the dependents re-run
//!    on the next flush pass.
//!
//! # Computed cells
//!
//! A cell can also be driven by a producer function instead of a plain
//! initial value. The cell then owns a nested computation that runs the
//! producer, feeds the result through the equality-gated write, and
//! re-runs whenever the producer's own dependencies change. That
//! computation nests under whichever computation was running at
//! construction time: when the enclosing computation is invalidated or
//! stopped, the refresher stops, and the cell simply keeps its last value
//! while remaining readable and writable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::computation::Computation;
use super::dependency::Dependency;
use super::error::ReactiveError;
use super::runtime::Runtime;

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique cell ID.
fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type EqualsFn<V> = dyn Fn(&V, &V) -> bool + Send + Sync;

/// A reactive value container.
///
/// Reads performed inside a running computation register that computation
/// as a dependent; writes that change the value (per the cell's equality
/// predicate) invalidate every dependent. Cells are cheap to clone; clones
/// share the same value and dependents.
///
/// # Example
///
/// ```rust,ignore
/// let count = ReactiveCell::new(0);
///
/// let observer = {
///     let count = count.clone();
///     Runtime::autorun(move |_| println!("count is {}", count.get()))
/// };
///
/// count.set(5);
/// Runtime::flush(); // prints: "count is 5"
/// count.set(5);
/// Runtime::flush(); // unchanged value: observer does not re-run
/// ```
pub struct ReactiveCell<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: CellInner<V>,

    /// The producer-driven refresher, present only for computed cells.
    /// Its lifecycle belongs to the engine's nesting rules; the cell only
    /// holds the handle.
    refresher: Arc<RwLock<Option<Computation>>>,
}

/// The shared value-holding state.
///
/// Split out so the refresher's body can capture it without also
/// capturing the refresher handle, which would keep the computation and
/// the cell alive through each other.
struct CellInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this cell.
    id: u64,

    /// The stored value. `None` only between construction of a computed
    /// cell and the first run of its producer, which happens before the
    /// constructor returns.
    value: Arc<RwLock<Option<V>>>,

    /// Equality predicate gating writes.
    equals: Arc<EqualsFn<V>>,

    /// Registry of the computations that read this cell.
    dependency: Dependency,
}

impl<V> ReactiveCell<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cell holding `initial`, with a custom equality predicate.
    ///
    /// The predicate must be pure and symmetric; the cell does not check
    /// this.
    pub fn with_equals<F>(initial: V, equals: F) -> Self
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        Self::from_value(initial, Arc::new(equals))
    }

    /// Create a producer-driven cell with a custom equality predicate.
    ///
    /// See [`ReactiveCell::computed`] for the construction contract.
    pub fn computed_with_equals<F, E>(producer: F, equals: E) -> Result<Self, ReactiveError>
    where
        F: FnMut() -> V + Send + 'static,
        E: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        Self::from_producer(producer, Arc::new(equals))
    }

    /// Get the current value, registering the running computation as a
    /// dependent.
    ///
    /// Registration is idempotent within a run; outside a computation the
    /// read is untracked.
    pub fn get(&self) -> V {
        self.inner.dependency.depend();
        self.inner.current()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> V {
        self.inner.current()
    }

    /// Write a new value, invalidating dependents if it differs from the
    /// stored one.
    ///
    /// When the equality predicate reports no change, the stored value is
    /// left untouched and nothing downstream re-runs. The equality
    /// predicate runs before any mutation, so a panic from it leaves the
    /// cell unchanged.
    pub fn set(&self, new_value: V) {
        self.inner.store(new_value);
    }

    /// Write a value derived from the current one, through the same
    /// equality gate as [`ReactiveCell::set`].
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&V) -> V,
    {
        let next = {
            let guard = self.inner.value.read();
            f(guard.as_ref().expect("cell holds a value once constructed"))
        };
        self.set(next);
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of computations currently depending on this cell.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependency.dependent_count()
    }

    /// The producer-driven computation refreshing this cell, if this is a
    /// computed cell. Once the enclosing computation is invalidated or
    /// stopped this handle reports stopped, and the cell keeps its last
    /// value.
    pub fn refresher(&self) -> Option<Computation> {
        self.refresher.read().clone()
    }

    fn from_value(initial: V, equals: Arc<EqualsFn<V>>) -> Self {
        Self {
            inner: CellInner {
                id: next_cell_id(),
                value: Arc::new(RwLock::new(Some(initial))),
                equals,
                dependency: Dependency::new(),
            },
            refresher: Arc::new(RwLock::new(None)),
        }
    }

    fn from_producer<F>(mut producer: F, equals: Arc<EqualsFn<V>>) -> Result<Self, ReactiveError>
    where
        F: FnMut() -> V + Send + 'static,
    {
        if !Runtime::active() {
            return Err(ReactiveError::NoEnclosingComputation);
        }

        let cell = Self {
            inner: CellInner {
                id: next_cell_id(),
                value: Arc::new(RwLock::new(None)),
                equals,
                dependency: Dependency::new(),
            },
            refresher: Arc::new(RwLock::new(None)),
        };

        // The producer must observe the ambient context of its
        // construction site on every run, not whatever happens to be
        // installed when the flush pass re-runs it.
        let ambient = Runtime::ambient();
        let refresher = {
            let inner = cell.inner.clone();
            Runtime::spawn(
                move |_| {
                    let next = Runtime::with_ambient(ambient.clone(), || producer());
                    inner.store(next);
                },
                true,
            )
        };
        *cell.refresher.write() = Some(refresher);
        Ok(cell)
    }
}

impl<V> ReactiveCell<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell holding `initial`, compared with `PartialEq`.
    pub fn new(initial: V) -> Self {
        Self::from_value(initial, Arc::new(V::eq))
    }

    /// Create a cell that continuously recomputes itself from `producer`.
    ///
    /// The producer runs once before this returns and again (on flush)
    /// whenever any cell it read during its last run changes; each result
    /// passes through the equality-gated write, so dependents of this cell
    /// re-run only when the produced value actually changes.
    ///
    /// Fails with [`ReactiveError::NoEnclosingComputation`] when no
    /// computation is running: the refresher nests under the enclosing
    /// computation and stops with it.
    pub fn computed<F>(producer: F) -> Result<Self, ReactiveError>
    where
        F: FnMut() -> V + Send + 'static,
    {
        Self::from_producer(producer, Arc::new(V::eq))
    }
}

impl<V> CellInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn current(&self) -> V {
        self.value
            .read()
            .as_ref()
            .expect("cell holds a value once constructed")
            .clone()
    }

    fn store(&self, new_value: V) {
        let mut slot = self.value.write();
        let changed = match slot.as_ref() {
            Some(current) => !(self.equals)(&new_value, current),
            // The very first write always takes effect; there is no
            // baseline to compare against.
            None => true,
        };
        if !changed {
            trace!(cell = self.id, "write rejected by equality gate");
            return;
        }
        *slot = Some(new_value);
        // Release the value lock before invalidating: hooks may read the
        // cell.
        drop(slot);
        trace!(cell = self.id, "value changed");
        self.dependency.changed();
    }
}

impl<V> Clone for CellInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            equals: Arc::clone(&self.equals),
            dependency: self.dependency.clone(),
        }
    }
}

impl<V> Clone for ReactiveCell<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            refresher: Arc::clone(&self.refresher),
        }
    }
}

/// Formats as `ReactiveCell(<value>)`.
///
/// The read is tracked: displaying a cell inside a computation registers
/// the computation as a dependent, the same as calling `get`.
impl<V> fmt::Display for ReactiveCell<V>
where
    V: Clone + Send + Sync + fmt::Display + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReactiveCell({})", self.get())
    }
}

/// Diagnostic formatting; the value read is untracked.
impl<V> fmt::Debug for ReactiveCell<V>
where
    V: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn cell_get_and_set() {
        let cell = ReactiveCell::new(0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let cell = ReactiveCell::new(10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn cell_clone_shares_state() {
        let cell1 = ReactiveCell::new(0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);

        cell2.set(100);
        assert_eq!(cell1.get(), 100);
    }

    #[test]
    fn cell_ids_are_unique() {
        let c1 = ReactiveCell::new(0);
        let c2 = ReactiveCell::new(0);
        let c3 = ReactiveCell::new(0);

        assert_ne!(c1.id(), c2.id());
        assert_ne!(c2.id(), c3.id());
        assert_ne!(c1.id(), c3.id());
    }

    #[test]
    fn unchanged_write_does_not_invalidate_dependents() {
        let cell = ReactiveCell::new(7);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let cell_clone = cell.clone();
        let observer = Runtime::autorun(move |_| {
            let _ = cell_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Same value: rejected by the equality gate, observer stays put.
        cell.set(7);
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(8);
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Writing the now-current value again is also a no-op.
        cell.set(8);
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        observer.stop();
    }

    #[test]
    fn custom_equality_gates_invalidation() {
        #[derive(Clone, Debug)]
        struct Row {
            id: u32,
            n: u32,
        }

        let cell = ReactiveCell::with_equals(Row { id: 1, n: 1 }, |a: &Row, b: &Row| a.id == b.id);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let cell_clone = cell.clone();
        let observer = Runtime::autorun(move |_| {
            let _ = cell_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Same id: not a change, and the stored value is not replaced.
        cell.set(Row { id: 1, n: 2 });
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cell.get_untracked().n, 1);

        // Different id: a change.
        cell.set(Row { id: 2, n: 2 });
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get_untracked().n, 2);

        observer.stop();
    }

    #[test]
    fn panicking_equality_leaves_the_value_unchanged() {
        let cell = ReactiveCell::with_equals(1, |a: &i32, _b: &i32| {
            if *a == 99 {
                panic!("bad comparison");
            }
            false
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.set(99);
        }));
        assert!(result.is_err());
        assert_eq!(cell.get_untracked(), 1);

        // The cell is still usable.
        cell.set(2);
        assert_eq!(cell.get_untracked(), 2);
    }

    #[test]
    fn reads_outside_computations_register_nothing() {
        let cell = ReactiveCell::new(1);
        let _ = cell.get();
        assert_eq!(cell.dependent_count(), 0);
    }

    #[test]
    fn untracked_reads_register_nothing() {
        let cell = ReactiveCell::new(1);
        let cell_clone = cell.clone();
        let observer = Runtime::autorun(move |_| {
            let _ = Runtime::untracked(|| cell_clone.get());
            let _ = cell_clone.get_untracked();
        });
        assert_eq!(cell.dependent_count(), 0);
        observer.stop();
    }

    #[test]
    fn computed_requires_an_enclosing_computation() {
        let result = ReactiveCell::<i32>::computed(|| 1);
        assert_eq!(result.unwrap_err(), ReactiveError::NoEnclosingComputation);
    }

    #[test]
    fn computed_cell_tracks_its_sources() {
        let source = ReactiveCell::new(2);
        let slot = Arc::new(parking_lot::Mutex::new(None));

        let source_clone = source.clone();
        let slot_clone = slot.clone();
        let wrapper = Runtime::autorun(move |_| {
            let source = source_clone.clone();
            let cell = ReactiveCell::computed(move || source.get() * 10).unwrap();
            *slot_clone.lock() = Some(cell);
        });

        let cell = slot.lock().take().unwrap();
        assert_eq!(cell.get_untracked(), 20);
        assert!(cell.refresher().is_some());

        source.set(3);
        Runtime::flush();
        assert_eq!(cell.get_untracked(), 30);

        wrapper.stop();
    }

    #[test]
    fn computed_cell_stays_usable_after_its_refresher_stops() {
        let source = ReactiveCell::new(1);
        let slot = Arc::new(parking_lot::Mutex::new(None));

        let source_clone = source.clone();
        let slot_clone = slot.clone();
        let wrapper = Runtime::autorun(move |_| {
            let source = source_clone.clone();
            let cell = ReactiveCell::computed(move || source.get()).unwrap();
            *slot_clone.lock() = Some(cell);
        });

        let cell = slot.lock().take().unwrap();
        wrapper.stop();
        assert!(cell.refresher().unwrap().is_stopped());

        // No longer refreshed...
        source.set(5);
        Runtime::flush();
        assert_eq!(cell.get_untracked(), 1);

        // ...but still a plain settable, gettable cell.
        cell.set(9);
        assert_eq!(cell.get_untracked(), 9);
    }

    #[test]
    fn display_is_a_tracked_read() {
        let cell = ReactiveCell::new(5);
        assert_eq!(cell.to_string(), "ReactiveCell(5)");

        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let cell_clone = cell.clone();
        let observer = Runtime::autorun(move |_| {
            let _ = cell_clone.to_string();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(cell.dependent_count(), 1);

        cell.set(6);
        Runtime::flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        observer.stop();
    }

    #[test]
    fn debug_is_untracked() {
        let cell = ReactiveCell::new(5);
        let cell_clone = cell.clone();
        let observer = Runtime::autorun(move |_| {
            let _ = format!("{cell_clone:?}");
        });
        assert_eq!(cell.dependent_count(), 0);
        observer.stop();
    }
}
