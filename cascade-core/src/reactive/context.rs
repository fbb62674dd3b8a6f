//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or computed is
//! read, the current computation records it as a dependency.
//!
//! # Implementation
//!
//! Synchronous evaluation uses a thread-local stack. Entering a computed or
//! effect pushes its tracker; the guard pops it on every exit path,
//! including unwinding. [`untrack`] pushes an empty entry, which hides any
//! outer tracker.
//!
//! Async effects cannot use the thread stack, since a task may be polled on
//! any worker thread and interleaves with other tasks. Their tracker lives
//! in a tokio task-local instead. The thread stack wins when non-empty: a
//! synchronous evaluation nested inside a task always finishes before the
//! task yields.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use super::subscriber::Tracker;
use crate::graph::{NodeId, Source};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Arc<Tracker>>>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_TRACKER: Arc<Tracker>;
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    observer: Option<NodeId>,
}

impl ReactiveContext {
    /// Enter a tracking context for one evaluation.
    pub(crate) fn enter(tracker: Arc<Tracker>) -> Self {
        let observer = Some(tracker.observer_id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(tracker)));
        Self { observer }
    }

    /// Enter a context in which reads are not tracked.
    pub(crate) fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { observer: None }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        current().is_some()
    }

    /// The node whose evaluation is currently tracking reads, if any.
    pub fn current_observer() -> Option<NodeId> {
        current().map(|tracker| tracker.observer_id())
    }

    /// Record a read of `source` against the current tracker.
    pub(crate) fn track(source: Arc<dyn Source>) {
        if let Some(tracker) = current() {
            tracker.track(source);
        }
    }

    /// Run `future` with `tracker` as its task-scoped tracker.
    pub(crate) fn scope_task<F>(tracker: Arc<Tracker>, future: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        TASK_TRACKER.scope(tracker, future)
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(|tracker| tracker.observer_id()),
                    self.observer,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

fn current() -> Option<Arc<Tracker>> {
    let from_stack = CONTEXT_STACK.with(|stack| stack.borrow().last().cloned());
    match from_stack {
        Some(entry) => entry,
        None => TASK_TRACKER.try_with(Arc::clone).ok(),
    }
}

/// Run `f` without tracking any reads it makes.
///
/// ```rust,ignore
/// create_effect(move || {
///     // Re-runs when `a` changes, but not when `b` does.
///     println!("{} {}", a.get(), untrack(|| b.get()));
/// });
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}
