//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately to establish its initial
//!    dependencies.
//!
//! 2. When a dependency is notified, the effect is queued on its runtime's
//!    scheduler. The flush re-checks that a dependency really changed
//!    before running it again.
//!
//! 3. Every run re-discovers dependencies; sources that were not read again
//!    stop notifying the effect.
//!
//! # Ownership
//!
//! The [`Effect`] handle owns the effect. Sources only hold weak references,
//! so dropping the handle (or calling [`Effect::dispose`]) is what tears it
//! down: it leaves every observer set and the scheduler queue, aborts an
//! in-flight async run, and runs its cleanups. Teardown happens once.
//!
//! # Cleanup
//!
//! A callback may return a [`Cleanup`], or register any number of them
//! through the [`OnCleanup`] argument. Cleanups run in registration order
//! before the next run and on teardown. A panicking cleanup is reported and
//! the remaining ones still run.
//!
//! # Async effects
//!
//! An async effect's callback returns a future that is spawned on the tokio
//! runtime that was current when the effect was created. Reads made while
//! the task runs are attributed to this effect through a task-local
//! tracker. Starting a new run aborts the previous in-flight one.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::subscriber::{any_stale, Dependencies, Tracker};
use crate::debug::graph_trace;
use crate::error::{BoxError, ReactiveError};
use crate::graph::{NodeId, Observer, ScheduledEffect};

const SCHEDULED: u8 = 1 << 0;
const DISPOSED: u8 = 1 << 1;
const NOTIFIED: u8 = 1 << 2;

/// A teardown action registered by an effect run.
pub struct Cleanup(Box<dyn FnOnce() + Send>);

impl Cleanup {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    fn run(self, effect: NodeId) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(self.0)) {
            tracing::warn!(
                effect = %effect,
                panic = %panic_message(payload.as_ref()),
                "effect cleanup panicked"
            );
        }
    }
}

/// Registers cleanups for the effect run it was handed to.
///
/// Cleanups registered after the effect was torn down run immediately.
#[derive(Clone)]
pub struct OnCleanup {
    id: NodeId,
    effect: Weak<EffectInner>,
}

impl OnCleanup {
    /// Register `f` to run before the next run or on teardown.
    pub fn register<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cleanup = Cleanup::new(f);
        match self.effect.upgrade() {
            Some(effect) => effect.add_cleanup(cleanup),
            None => cleanup.run(self.id),
        }
    }
}

type Outcome = Result<Option<Cleanup>, BoxError>;

/// Values an effect callback may return.
///
/// `()` and [`Cleanup`] cover the common cases; returning `Err` reports the
/// error without stopping future runs.
pub trait EffectOutput {
    fn into_outcome(self) -> Result<Option<Cleanup>, BoxError>;
}

impl EffectOutput for () {
    fn into_outcome(self) -> Outcome {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_outcome(self) -> Outcome {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_outcome(self) -> Outcome {
        Ok(self)
    }
}

impl<E> EffectOutput for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Outcome {
        self.map(|()| None).map_err(Into::into)
    }
}

impl<E> EffectOutput for Result<Cleanup, E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Outcome {
        self.map(Some).map_err(Into::into)
    }
}

pub(crate) type SyncCallback = Box<dyn FnMut(&OnCleanup) -> Outcome + Send>;
pub(crate) type AsyncCallback = Box<dyn Fn(OnCleanup) -> BoxFuture<'static, Outcome> + Send + Sync>;

pub(crate) fn sync_callback<F, R>(mut f: F) -> SyncCallback
where
    F: FnMut(&OnCleanup) -> R + Send + 'static,
    R: EffectOutput,
{
    Box::new(move |on_cleanup: &OnCleanup| f(on_cleanup).into_outcome())
}

pub(crate) fn async_callback<F, Fut, R>(f: F) -> AsyncCallback
where
    F: Fn(OnCleanup) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: EffectOutput,
{
    Box::new(move |on_cleanup| {
        let run = f(on_cleanup);
        async move { run.await.into_outcome() }.boxed()
    })
}

enum Callback {
    Sync(Mutex<SyncCallback>),
    Async { handle: Handle, run: AsyncCallback },
}

struct AsyncRun {
    generation: u64,
    tracker: Arc<Tracker>,
    task: JoinHandle<()>,
}

pub(crate) struct EffectInner {
    id: NodeId,
    this: Weak<EffectInner>,
    runtime: Runtime,
    flags: AtomicU8,
    callback: Callback,
    dependencies: Mutex<Dependencies>,
    cleanups: Mutex<SmallVec<[Cleanup; 2]>>,
    in_flight: Mutex<Option<AsyncRun>>,
    generation: AtomicU64,
    runs: AtomicUsize,
}

impl EffectInner {
    fn has_flag(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    fn tracker(&self) -> Arc<Tracker> {
        let observer: Weak<dyn Observer> = self.this.clone();
        Tracker::new(self.id, observer)
    }

    fn on_cleanup(&self) -> OnCleanup {
        OnCleanup {
            id: self.id,
            effect: self.this.clone(),
        }
    }

    /// Run the callback once, after the previous run's cleanups.
    fn execute(&self) {
        if self.has_flag(DISPOSED) {
            return;
        }
        self.run_cleanups();

        match &self.callback {
            Callback::Sync(callback) => self.execute_sync(callback),
            Callback::Async { handle, run } => self.execute_async(handle, run),
        }
    }

    fn execute_sync(&self, callback: &Mutex<SyncCallback>) {
        let tracker = self.tracker();
        let on_cleanup = self.on_cleanup();

        let outcome = {
            let _ctx = ReactiveContext::enter(tracker.clone());
            let mut callback = callback.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*callback)(&on_cleanup)))
        };

        self.runs.fetch_add(1, Ordering::Relaxed);
        self.settle(tracker.finish(), flatten(outcome));
    }

    fn execute_async(&self, handle: &Handle, run: &AsyncCallback) {
        let tracker = self.tracker();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let future = {
            let _ctx = ReactiveContext::enter(tracker.clone());
            run(self.on_cleanup())
        };

        let previous = {
            // Held across spawn so the task cannot finish before it is registered.
            let mut in_flight = self.in_flight.lock();
            let this = self.this.clone();
            let task_tracker = tracker.clone();
            let task = handle.spawn(async move {
                let outcome = ReactiveContext::scope_task(
                    task_tracker.clone(),
                    AssertUnwindSafe(future).catch_unwind(),
                )
                .await;
                if let Some(effect) = this.upgrade() {
                    effect.finish_async(generation, &task_tracker, flatten(outcome));
                }
            });
            self.flags.fetch_or(SCHEDULED, Ordering::AcqRel);
            in_flight.replace(AsyncRun {
                generation,
                tracker,
                task,
            })
        };

        if let Some(previous) = previous {
            graph_trace!(effect = %self.id, generation = previous.generation, "aborting superseded run");
            previous.task.abort();
            self.release_run(&previous.tracker);
        }
    }

    fn finish_async(&self, generation: u64, tracker: &Tracker, outcome: Outcome) {
        let current = {
            let mut in_flight = self.in_flight.lock();
            let current = in_flight
                .as_ref()
                .is_some_and(|run| run.generation == generation);
            if current {
                in_flight.take();
            }
            current
        };

        if !current {
            self.release_run(tracker);
            if let Ok(Some(cleanup)) = outcome {
                cleanup.run(self.id);
            }
            return;
        }

        self.flags.fetch_and(!SCHEDULED, Ordering::AcqRel);
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.settle(tracker.finish(), outcome);
    }

    /// Unsubscribe from whatever only a superseded run had read.
    fn release_run(&self, tracker: &Tracker) {
        let stale = tracker.finish();
        let current = self
            .in_flight
            .lock()
            .as_ref()
            .map(|run| run.tracker.clone());
        let deps = self.dependencies.lock();
        stale.release_except(self.id, |id| {
            deps.contains(id) || current.as_ref().is_some_and(|tracker| tracker.contains(id))
        });
    }

    /// Install the dependencies of a finished run and handle its outcome.
    fn settle(&self, next: Dependencies, outcome: Outcome) {
        if self.has_flag(DISPOSED) {
            // Disposed mid-run: keep nothing subscribed.
            next.release_except(self.id, |_| false);
        } else {
            self.dependencies.lock().replace(next, self.id);
        }

        match outcome {
            Ok(Some(cleanup)) => self.add_cleanup(cleanup),
            Ok(None) => {}
            Err(err) => tracing::error!(effect = %self.id, error = %err, "effect callback failed"),
        }
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        let mut cleanups = self.cleanups.lock();
        if self.has_flag(DISPOSED) {
            drop(cleanups);
            cleanup.run(self.id);
        } else {
            cleanups.push(cleanup);
        }
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup.run(self.id);
        }
    }

    fn needs_run(&self) -> bool {
        let mut edges = self.dependencies.lock().snapshot();
        let in_flight = self
            .in_flight
            .lock()
            .as_ref()
            .map(|run| run.tracker.clone());
        if let Some(tracker) = in_flight {
            edges.extend(tracker.snapshot());
        }
        any_stale(&edges)
    }

    fn dispose(&self) {
        let previous = self.flags.fetch_or(DISPOSED, Ordering::AcqRel);
        if previous & DISPOSED != 0 {
            return;
        }
        graph_trace!(effect = %self.id, "dispose");

        self.runtime.scheduler().cancel(self.id);
        self.dependencies.lock().clear(self.id);

        let run = self.in_flight.lock().take();
        if let Some(run) = run {
            run.task.abort();
            run.tracker.finish().clear(self.id);
        }

        self.flags.fetch_and(!(SCHEDULED | NOTIFIED), Ordering::AcqRel);
        self.run_cleanups();
    }
}

impl Observer for EffectInner {
    fn id(&self) -> NodeId {
        self.id
    }

    fn notify(&self) {
        if self.has_flag(DISPOSED) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.runtime.schedule(this);
        }
    }

    fn is_disposed(&self) -> bool {
        self.has_flag(DISPOSED)
    }
}

impl ScheduledEffect for EffectInner {
    fn id(&self) -> NodeId {
        self.id
    }

    fn mark_notified(&self) -> bool {
        if self.has_flag(DISPOSED) {
            return false;
        }
        self.flags.fetch_or(NOTIFIED, Ordering::AcqRel) & NOTIFIED == 0
    }

    fn clear_notified(&self) {
        self.flags.fetch_and(!NOTIFIED, Ordering::AcqRel);
    }

    fn is_disposed(&self) -> bool {
        self.has_flag(DISPOSED)
    }

    fn run_if_stale(&self) {
        if self.needs_run() {
            self.execute();
        }
    }
}

fn flatten(outcome: std::thread::Result<Outcome>) -> Outcome {
    outcome.unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The handle owns the effect: dropping it disposes the effect.
///
/// # Example
///
/// ```rust,ignore
/// let count = create_signal(0);
///
/// let effect = create_effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// drop(effect);   // No more runs
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    pub(crate) fn new_sync(runtime: Runtime, callback: SyncCallback) -> Result<Self, ReactiveError> {
        Self::start(runtime, Callback::Sync(Mutex::new(callback)))
    }

    pub(crate) fn new_async(runtime: Runtime, run: AsyncCallback) -> Result<Self, ReactiveError> {
        let handle = Handle::try_current().map_err(|_| ReactiveError::NoAsyncRuntime)?;
        Self::start(runtime, Callback::Async { handle, run })
    }

    fn start(runtime: Runtime, callback: Callback) -> Result<Self, ReactiveError> {
        let inner = Arc::new_cyclic(|this| EffectInner {
            id: NodeId::new(),
            this: this.clone(),
            runtime: runtime.clone(),
            flags: AtomicU8::new(0),
            callback,
            dependencies: Mutex::new(Dependencies::default()),
            cleanups: Mutex::new(SmallVec::new()),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            runs: AtomicUsize::new(0),
        });
        graph_trace!(effect = %inner.id, "created");

        let effect = Self { inner };
        // On a flush error the handle is dropped here, which disposes it.
        runtime.batch(|| effect.inner.execute())?;
        Ok(effect)
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Tear the effect down: no further runs, cleanups run now.
    ///
    /// Idempotent; dropping the handle afterwards does nothing more.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.has_flag(DISPOSED)
    }

    /// Whether an async run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.has_flag(SCHEDULED)
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::Relaxed)
    }

    /// Number of nodes read during the last completed run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
