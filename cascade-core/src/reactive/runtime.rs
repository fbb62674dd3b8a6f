//! Reactive Runtime
//!
//! The runtime is the handle that ties signals, computeds and effects into
//! one graph. It owns the scheduler, so nodes created from the same runtime
//! share a batch depth and a pending effect queue.
//!
//! # How It Works
//!
//! 1. Every node keeps a clone of the runtime it was created from.
//!
//! 2. A signal write opens a batch on that runtime, notifies its observers
//!    and closes the batch:
//!    a. Computeds are marked dirty and forward the mark downstream
//!    b. Effects are queued on the scheduler
//!    c. Computeds recompute lazily on the next read
//!
//! 3. When the outermost batch closes, the scheduler flushes the queue.
//!
//! 4. An effect may read signals of another runtime. When such a write
//!    queues it on a runtime with no batch open, that runtime is flushed as
//!    soon as the writing thread leaves its outermost batch.
//!
//! # Thread Safety
//!
//! A runtime is `Send + Sync` and cheap to clone. The free functions in the
//! crate root use a per-thread default runtime; create one explicitly with
//! [`Runtime::new`] to get an independent graph.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::computed::{Computed, ComputedOptions};
use super::effect::{async_callback, sync_callback, Effect, EffectOutput, OnCleanup};
use super::signal::Signal;
use crate::config::RuntimeConfig;
use crate::debug::graph_trace;
use crate::error::{ComputeResult, ReactiveError};
use crate::graph::{ScheduledEffect, Scheduler};

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::new();

    /// Batches open on this thread, across all runtimes.
    static THREAD_BATCH_DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Idle runtimes that received work during this thread's batch.
    static DEFERRED_FLUSHES: RefCell<VecDeque<Runtime>> = const { RefCell::new(VecDeque::new()) };
}

/// Keeps the thread batch depth balanced across unwinding.
struct ThreadBatch {
    outermost: bool,
}

impl ThreadBatch {
    fn enter() -> Self {
        let depth = THREAD_BATCH_DEPTH.with(|depth| {
            depth.set(depth.get() + 1);
            depth.get()
        });
        Self {
            outermost: depth == 1,
        }
    }
}

impl Drop for ThreadBatch {
    fn drop(&mut self) {
        THREAD_BATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Handle to one reactive graph.
#[derive(Clone)]
pub struct Runtime {
    scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Create a runtime with default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(config)),
        }
    }

    /// The default runtime of the calling thread.
    pub fn current() -> Self {
        DEFAULT_RUNTIME.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.scheduler.config()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Whether both handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.scheduler, &other.scheduler)
    }

    /// Create a signal compared with `PartialEq`.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Signal::new(self.clone(), value)
    }

    /// Create a signal with a custom equality predicate.
    pub fn signal_with<T, F>(&self, value: T, equal: F) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Signal::with_equality(self.clone(), value, Arc::new(equal))
    }

    /// Create a lazily evaluated computed value.
    ///
    /// A computed never schedules work, so it is not bound to this runtime:
    /// writes reach it through whichever runtime owns the signals it reads.
    pub fn computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> ComputeResult<T> + Send + Sync + 'static,
    {
        Computed::new(compute, ComputedOptions::new())
    }

    /// Create a computed with a fallback and/or custom equality.
    ///
    /// Like [`Runtime::computed`], the result is not bound to this runtime.
    pub fn computed_with<T, F>(&self, compute: F, options: ComputedOptions<T>) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> ComputeResult<T> + Send + Sync + 'static,
    {
        Computed::new(compute, options)
    }

    /// Create an effect and run it once.
    ///
    /// The returned handle owns the effect; dropping it stops the effect.
    /// An error means the flush started by the first run exceeded the
    /// iteration bound.
    pub fn effect<F, R>(&self, mut f: F) -> Result<Effect, ReactiveError>
    where
        F: FnMut() -> R + Send + 'static,
        R: EffectOutput,
    {
        Effect::new_sync(self.clone(), sync_callback(move |_: &OnCleanup| f()))
    }

    /// Create an effect whose callback registers cleanups explicitly.
    pub fn effect_with_cleanup<F, R>(&self, f: F) -> Result<Effect, ReactiveError>
    where
        F: FnMut(&OnCleanup) -> R + Send + 'static,
        R: EffectOutput,
    {
        Effect::new_sync(self.clone(), sync_callback(f))
    }

    /// Create an effect whose runs are spawned on the current tokio runtime.
    ///
    /// Fails with [`ReactiveError::NoAsyncRuntime`] outside a tokio runtime.
    pub fn async_effect<F, Fut, R>(&self, f: F) -> Result<Effect, ReactiveError>
    where
        F: Fn(OnCleanup) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: EffectOutput,
    {
        Effect::new_async(self.clone(), async_callback(f))
    }

    /// Run `f` with effect flushing deferred until the outermost batch ends.
    ///
    /// Batches nest. If `f` panics, pending effects are still flushed before
    /// the panic resumes. Leaving the outermost batch of the calling thread
    /// also flushes other runtimes whose effects the batch reached.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let thread_batch = ThreadBatch::enter();
        self.scheduler.begin_batch();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let mut flushed = self.scheduler.end_batch();

        if thread_batch.outermost {
            let deferred = self.flush_deferred();
            flushed = flushed.and(deferred);
        }
        drop(thread_batch);

        match result {
            Ok(value) => flushed.map(|()| value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Queue an effect on this runtime's scheduler.
    pub(crate) fn schedule(&self, effect: Arc<dyn ScheduledEffect>) {
        if !self.scheduler.enqueue(effect) {
            return;
        }

        // Queued on an idle runtime: the write came from another graph.
        let in_batch = THREAD_BATCH_DEPTH.with(|depth| depth.get() > 0);
        if in_batch {
            DEFERRED_FLUSHES.with(|deferred| {
                let mut deferred = deferred.borrow_mut();
                if !deferred.iter().any(|runtime| runtime.ptr_eq(self)) {
                    graph_trace!(pending = self.scheduler.pending_count(), "deferring flush of idle runtime");
                    deferred.push_back(self.clone());
                }
            });
        } else if let Err(err) = self.batch(|| ()) {
            tracing::error!(error = %err, "flush of idle runtime failed");
        }
    }

    /// Flush every runtime deferred by this thread's batch, including ones
    /// deferred while flushing.
    fn flush_deferred(&self) -> Result<(), ReactiveError> {
        let limit = self.config().max_flush_iterations;
        let mut result = Ok(());
        let mut rounds = 0;

        while let Some(runtime) = DEFERRED_FLUSHES.with(|deferred| deferred.borrow_mut().pop_front()) {
            rounds += 1;
            if rounds > limit {
                let mut stranded = vec![runtime];
                stranded.extend(DEFERRED_FLUSHES.with(|deferred| deferred.borrow_mut().split_off(0)));
                let dropped: usize = stranded
                    .iter()
                    .map(|runtime| runtime.scheduler.discard_pending())
                    .sum();
                tracing::error!(limit, dropped, "runtimes kept waking each other past the flush bound");
                return Err(ReactiveError::ReactiveCycleExceeded { limit });
            }

            runtime.scheduler.begin_batch();
            let flushed = runtime.scheduler.end_batch();
            if result.is_ok() {
                result = flushed;
            }
        }
        result
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.config())
            .field("depth", &self.scheduler.depth())
            .field("pending", &self.scheduler.pending_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
