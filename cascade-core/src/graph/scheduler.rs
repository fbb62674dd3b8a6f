//! Effect Scheduler
//!
//! The scheduler holds effects waiting to re-run and the batch depth that
//! decides when they may run.
//!
//! # Algorithm
//!
//! 1. A write notifies its observers inside a batch scope. Effects reached
//!    by the notification are appended to the pending queue once each.
//! 2. When the outermost batch scope exits, the queue is flushed:
//!    - Take the whole queue, leaving it empty for work scheduled meanwhile
//!    - For every taken effect, clear its queued flag, skip it if disposed,
//!      and run it if one of its dependencies really changed
//!    - Repeat while effects keep enqueueing more work
//! 3. If the repeat count passes the configured bound, the remaining work is
//!    dropped and the flush reports a cycle.
//!
//! Writes performed by effects while a flush is running never start a
//! nested flush; the running loop picks them up on its next iteration.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::node::NodeId;
use crate::config::RuntimeConfig;
use crate::debug::graph_trace;
use crate::error::ReactiveError;

/// What the scheduler needs from a queued effect.
pub(crate) trait ScheduledEffect: Send + Sync {
    fn id(&self) -> NodeId;

    /// Set the queued flag. Returns false if it was already set.
    fn mark_notified(&self) -> bool;

    fn clear_notified(&self);

    fn is_disposed(&self) -> bool;

    /// Re-check dependencies and run the effect if one of them changed.
    fn run_if_stale(&self);
}

#[derive(Default)]
struct SchedulerState {
    depth: usize,
    flushing: bool,
    pending: Vec<Arc<dyn ScheduledEffect>>,
}

/// Pending effect queue plus batch depth for one reactive graph.
pub struct Scheduler {
    config: RuntimeConfig,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current batch nesting depth.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether a flush is currently draining the queue.
    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing
    }

    /// Queue an effect unless it is already queued.
    ///
    /// Returns true when the effect was queued while no batch was open and
    /// no flush was running: nothing on this scheduler will pick it up, so
    /// the caller must arrange a flush.
    pub(crate) fn enqueue(&self, effect: Arc<dyn ScheduledEffect>) -> bool {
        if !effect.mark_notified() {
            return false;
        }
        graph_trace!(effect = %effect.id(), "enqueue");
        let mut state = self.state.lock();
        state.pending.push(effect);
        state.depth == 0 && !state.flushing
    }

    /// Remove an effect from the queue (it is being disposed).
    pub(crate) fn cancel(&self, id: NodeId) {
        self.state.lock().pending.retain(|effect| effect.id() != id);
    }

    /// Drop the queue of an idle scheduler, returning how many effects were
    /// dropped. A scheduler with a batch open or a flush running keeps its
    /// queue, since that batch or flush will drain it.
    pub(crate) fn discard_pending(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            if state.depth > 0 || state.flushing {
                return 0;
            }
            std::mem::take(&mut state.pending)
        };
        for effect in &dropped {
            effect.clear_notified();
        }
        dropped.len()
    }

    pub fn begin_batch(&self) {
        let mut state = self.state.lock();
        state.depth += 1;
        graph_trace!(depth = state.depth, "batch start");
    }

    /// Leave a batch scope, flushing if it was the outermost one.
    pub fn end_batch(&self) -> Result<(), ReactiveError> {
        let should_flush = {
            let mut state = self.state.lock();
            debug_assert!(state.depth > 0, "end_batch without begin_batch");
            state.depth = state.depth.saturating_sub(1);
            graph_trace!(depth = state.depth, "batch end");
            // Claimed under the same lock so only one thread drains.
            let flush = state.depth == 0 && !state.flushing;
            if flush {
                state.flushing = true;
            }
            flush
        };

        if should_flush {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Drain the queue. The caller has already claimed the flushing flag.
    fn flush(&self) -> Result<(), ReactiveError> {
        let mut guard = FlushGuard {
            scheduler: self,
            drained: false,
        };

        let limit = self.config.max_flush_iterations;
        let mut iterations = 0;

        loop {
            let work = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    // Released together with the emptiness check: a thread
                    // that enqueues after this point flushes on its own.
                    state.flushing = false;
                    guard.drained = true;
                    return Ok(());
                }
                std::mem::take(&mut state.pending)
            };

            iterations += 1;
            if iterations > limit {
                for effect in &work {
                    effect.clear_notified();
                }
                tracing::error!(limit, dropped = work.len(), "reactive cycle exceeded flush bound");
                return Err(ReactiveError::ReactiveCycleExceeded { limit });
            }
            graph_trace!(iteration = iterations, effects = work.len(), "flush");

            for effect in work {
                effect.clear_notified();
                if effect.is_disposed() {
                    continue;
                }
                let run = panic::catch_unwind(AssertUnwindSafe(|| effect.run_if_stale()));
                if run.is_err() {
                    tracing::error!(effect = %effect.id(), "effect panicked during flush");
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// Releases the flushing flag when a flush bails out with a cycle error (or
/// unwinds), dropping whatever is still queued.
struct FlushGuard<'a> {
    scheduler: &'a Scheduler,
    drained: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if self.drained {
            return;
        }
        let leftover = {
            let mut state = self.scheduler.state.lock();
            state.flushing = false;
            std::mem::take(&mut state.pending)
        };
        for effect in leftover {
            effect.clear_notified();
        }
    }
}
