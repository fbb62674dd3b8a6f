//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    signal registers that context as an observer.
//!
//! 2. When a signal is set to a value its equality predicate considers
//!    different, its version is bumped and all observers are notified
//!    inside a batch scope.
//!
//! 3. Setting an equal value does nothing at all.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use crate::debug::graph_trace;
use crate::error::ReactiveError;
use crate::graph::{default_equal, EqualFn, NodeId, NodeKind, ObserverSet, Source};

struct SignalInner<T> {
    id: NodeId,
    runtime: Runtime,
    value: RwLock<T>,
    version: AtomicU64,
    equal: EqualFn<T>,
    observers: ObserverSet,
}

impl<T> Source for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Signal
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn refresh(&self) -> Result<(), ReactiveError> {
        Ok(())
    }

    fn observers(&self) -> &ObserverSet {
        &self.observers
    }
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = create_signal(0);
///
/// // Read the value (tracked inside computeds and effects)
/// let value = count.get();
///
/// // Update the value (notifies observers)
/// count.set(5)?;
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal compared with `PartialEq`.
    pub(crate) fn new(runtime: Runtime, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(runtime, value, default_equal())
    }

    /// Create a signal with a custom equality predicate.
    pub(crate) fn with_equality(runtime: Runtime, value: T, equal: EqualFn<T>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: NodeId::new(),
                runtime,
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                equal,
                observers: ObserverSet::new(),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as an observer.
    pub fn get(&self) -> T {
        ReactiveContext::track(self.inner.clone());
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Call `f` with the current value, tracking the read.
    ///
    /// `f` sees a snapshot taken before it runs, so it may write this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track(self.inner.clone());
        let value = self.inner.value.read().clone();
        f(&value)
    }

    /// Set a new value and notify observers.
    ///
    /// Equal values are ignored. Any error comes from the flush this write
    /// triggered, not from the write itself: the value is stored either way.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        {
            let mut current = self.inner.value.write();
            if (self.inner.equal)(&current, &value) {
                graph_trace!(signal = %self.inner.id, "set skipped, value unchanged");
                return Ok(());
            }
            *current = value;
            self.inner.version.fetch_add(1, Ordering::AcqRel);
        }
        graph_trace!(signal = %self.inner.id, observers = self.inner.observers.len(), "set");

        self.inner.runtime.batch(|| self.inner.observers.notify_all())
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        self.set(f(&current))
    }

    /// Number of computeds and effects currently observing this signal.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Monotonic counter of value changes.
    pub fn version(&self) -> u64 {
        self.inner.version()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
