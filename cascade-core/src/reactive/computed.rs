//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. Nothing runs at creation. The first read evaluates the compute
//!    function and caches the outcome.
//!
//! 2. When a dependency changes, the computed is only marked dirty, and the
//!    mark is forwarded to its own observers. No recomputation happens yet.
//!
//! 3. On the next read of a dirty computed, its dependencies are refreshed
//!    and their versions compared with the ones seen last time. If none
//!    moved, the computed becomes clean without running.
//!
//! 4. Otherwise it re-evaluates. An outcome equal to the cached one keeps
//!    the cached value and version, which stops propagation right here.
//!
//! # Failures
//!
//! A compute function returns [`ComputeResult`]. With a fallback configured,
//! a failure caches the fallback as if it were the real result. Without one
//! the failure itself is cached and handed to readers as
//! [`ReactiveError::ComputeFailed`]. Circular reads are never absorbed by
//! the fallback.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::subscriber::{any_stale, Dependencies, Tracker};
use crate::debug::graph_trace;
use crate::error::{BoxError, ComputeResult, ReactiveError};
use crate::graph::{default_equal, EqualFn, NodeId, NodeKind, Observer, ObserverSet, Source};

type ComputeFn<T> = Box<dyn Fn() -> ComputeResult<T> + Send + Sync>;

/// Construction options for a [`Computed`].
pub struct ComputedOptions<T> {
    fallback: Option<T>,
    equal: EqualFn<T>,
}

impl<T> ComputedOptions<T>
where
    T: PartialEq + 'static,
{
    /// Options comparing values with `PartialEq` and no fallback.
    pub fn new() -> Self {
        Self {
            fallback: None,
            equal: default_equal(),
        }
    }
}

impl<T> ComputedOptions<T> {
    /// Options with a custom equality predicate and no fallback.
    pub fn with_equality<F>(equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            fallback: None,
            equal: Arc::new(equal),
        }
    }

    /// Value to cache when the compute function fails.
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Replace the equality predicate.
    pub fn equality<F>(mut self, equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.equal = Arc::new(equal);
        self
    }
}

impl<T> Default for ComputedOptions<T>
where
    T: PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

struct ComputedState<T> {
    /// Outcome of the last evaluation; `None` until the first one ends.
    value: Option<Result<T, ReactiveError>>,
    dirty: bool,
    version: u64,
}

struct ComputedInner<T> {
    id: NodeId,
    this: Weak<ComputedInner<T>>,
    compute: ComputeFn<T>,
    fallback: Option<T>,
    equal: EqualFn<T>,
    state: Mutex<ComputedState<T>>,
    dependencies: Mutex<Dependencies>,
    observers: ObserverSet,
    evaluating: AtomicBool,
}

/// Clears the evaluating flag even if the compute function panics.
struct EvaluatingGuard<'a>(&'a AtomicBool);

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn bring_up_to_date(&self) -> Result<(), ReactiveError> {
        if self.evaluating.load(Ordering::Acquire) {
            return Err(ReactiveError::CircularDependency { node: self.id });
        }

        let has_value = {
            let state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.value.is_some()
        };

        self.evaluating.store(true, Ordering::Release);
        let _guard = EvaluatingGuard(&self.evaluating);

        if has_value {
            let edges = self.dependencies.lock().snapshot();
            if !any_stale(&edges) {
                graph_trace!(computed = %self.id, "dirty but inputs unchanged");
                self.state.lock().dirty = false;
                return Ok(());
            }
        }

        self.evaluate();
        Ok(())
    }

    fn evaluate(&self) {
        let observer: Weak<dyn Observer> = self.this.clone();
        let tracker = Tracker::new(self.id, observer);

        let outcome = {
            let _ctx = ReactiveContext::enter(tracker.clone());
            (self.compute)()
        };
        self.dependencies.lock().replace(tracker.finish(), self.id);

        let outcome = outcome.or_else(|err| self.recover(err));

        let mut state = self.state.lock();
        let changed = match (&state.value, &outcome) {
            (Some(Ok(old)), Ok(new)) => !(self.equal)(old, new),
            (Some(Err(_)), Err(_)) => false,
            _ => true,
        };
        if changed {
            state.value = Some(outcome);
            state.version += 1;
        }
        state.dirty = false;
        graph_trace!(computed = %self.id, changed, version = state.version, "evaluated");
    }

    /// Turn a compute failure into the outcome to cache.
    fn recover(&self, err: BoxError) -> Result<T, ReactiveError> {
        if let Some(reactive) = err.downcast_ref::<ReactiveError>() {
            if reactive.is_circular() {
                return Err(reactive.clone());
            }
        }

        match &self.fallback {
            Some(fallback) => {
                graph_trace!(computed = %self.id, error = %err, "compute failed, using fallback");
                Ok(fallback.clone())
            }
            None => Err(ReactiveError::ComputeFailed {
                node: self.id,
                source: Arc::from(err),
            }),
        }
    }

    fn cached(&self) -> Result<T, ReactiveError> {
        match &self.state.lock().value {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(err.clone()),
            // Only observable from inside the first evaluation.
            None => Err(ReactiveError::CircularDependency { node: self.id }),
        }
    }
}

impl<T> Source for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn version(&self) -> u64 {
        self.state.lock().version
    }

    fn refresh(&self) -> Result<(), ReactiveError> {
        self.bring_up_to_date()?;
        self.cached().map(|_| ())
    }

    fn observers(&self) -> &ObserverSet {
        &self.observers
    }
}

impl<T> Observer for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn notify(&self) {
        let was_clean = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.dirty, true)
        };
        if was_clean {
            graph_trace!(computed = %self.id, "marked dirty");
            self.observers.notify_all();
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.dependencies.get_mut().clear(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning a computed yields another handle to the same node.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F>(compute: F, options: ComputedOptions<T>) -> Self
    where
        F: Fn() -> ComputeResult<T> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| ComputedInner {
            id: NodeId::new(),
            this: this.clone(),
            compute: Box::new(compute),
            fallback: options.fallback,
            equal: options.equal,
            state: Mutex::new(ComputedState {
                value: None,
                dirty: true,
                version: 0,
            }),
            dependencies: Mutex::new(Dependencies::default()),
            observers: ObserverSet::new(),
            evaluating: AtomicBool::new(false),
        });
        Self { inner }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context the read is tracked, even when it fails,
    /// so the reader re-runs once the failure clears.
    pub fn get(&self) -> Result<T, ReactiveError> {
        let refreshed = self.inner.bring_up_to_date();
        ReactiveContext::track(self.inner.clone());
        refreshed?;
        self.inner.cached()
    }

    /// Get the current value without tracking the read.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        self.inner.bring_up_to_date()?;
        self.inner.cached()
    }

    /// Whether the cached value may be stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Whether the computed has been evaluated at least once.
    pub fn has_value(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    /// Monotonic counter of value changes.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of computeds and effects currently observing this one.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Number of nodes read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("dirty", &self.is_dirty())
            .field("has_value", &self.has_value())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
