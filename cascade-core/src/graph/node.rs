//! Graph Nodes
//!
//! This module defines the pieces every node in the reactive graph shares:
//! identifiers, the readable [`Source`] side, the notifiable [`Observer`]
//! side, and the weakly-held observer collection that links them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::debug::graph_trace;
use crate::error::ReactiveError;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a readable node. Effects are never read, so they have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable cell. Roots of the graph: no dependencies, only observers.
    Signal,

    /// A derived cell. Has dependencies and may have observers.
    Computed,
}

/// Equality predicate deciding whether a new value counts as a change.
pub type EqualFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// The `PartialEq` predicate used when none is supplied.
pub fn default_equal<T: PartialEq + 'static>() -> EqualFn<T> {
    Arc::new(|a: &T, b: &T| a == b)
}

/// A node that can be read and therefore depended on.
pub(crate) trait Source: Send + Sync {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    /// Counter bumped every time the cached value changes.
    fn version(&self) -> u64;

    /// Bring the cached value up to date. Signals are always current.
    fn refresh(&self) -> Result<(), ReactiveError>;

    fn observers(&self) -> &ObserverSet;
}

/// A node that reacts when one of its sources changes.
pub(crate) trait Observer: Send + Sync {
    fn id(&self) -> NodeId;

    /// A source changed (or may have changed).
    fn notify(&self);

    /// Torn-down observers must not pick up new subscriptions.
    fn is_disposed(&self) -> bool {
        false
    }
}

/// Observers of a node, held weakly and kept in subscription order.
///
/// Nodes never own their observers: an effect lives exactly as long as its
/// handle, a computed as long as someone holds it.
#[derive(Default)]
pub(crate) struct ObserverSet {
    entries: Mutex<IndexMap<NodeId, Weak<dyn Observer>>>,
}

impl ObserverSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self, id: NodeId, observer: Weak<dyn Observer>) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&id) {
            graph_trace!(observer = %id, "subscribe");
            entries.insert(id, observer);
        }
    }

    pub(crate) fn unsubscribe(&self, id: NodeId) {
        if self.entries.lock().shift_remove(&id).is_some() {
            graph_trace!(observer = %id, "unsubscribe");
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Notify every live observer, dropping entries whose owner is gone.
    ///
    /// The lock is released before any observer runs, so observers may
    /// subscribe or unsubscribe while being notified.
    pub(crate) fn notify_all(&self) {
        let live: Vec<Arc<dyn Observer>> = {
            let mut entries = self.entries.lock();
            entries.retain(|_, weak| weak.strong_count() > 0);
            entries.values().filter_map(Weak::upgrade).collect()
        };

        for observer in live {
            graph_trace!(observer = %observer.id(), "notify");
            observer.notify();
        }
    }
}
