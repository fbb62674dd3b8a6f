//! Dependency bookkeeping for subscribers.
//!
//! A subscriber is any computation that reads reactive values: a computed
//! or an effect. Each evaluation gets a fresh [`Tracker`] that records what
//! was read; when the evaluation ends the recorded set replaces the
//! subscriber's [`Dependencies`] wholesale.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::debug::graph_trace;
use crate::graph::{NodeId, Observer, Source};

/// A recorded read: the source and the version it had at the time.
#[derive(Clone)]
pub(crate) struct Edge {
    pub(crate) source: Arc<dyn Source>,
    pub(crate) version: u64,
}

impl Edge {
    /// Whether the source moved on since this edge was recorded.
    ///
    /// Computed sources are brought up to date first, so a dirty computed
    /// whose value ends up equal does not count as a change. A source that
    /// fails to refresh counts as changed so the subscriber gets to see the
    /// error.
    fn is_stale(&self) -> bool {
        self.source.refresh().is_err() || self.source.version() != self.version
    }
}

/// Whether any of the edges points at a source that changed.
pub(crate) fn any_stale(edges: &[Edge]) -> bool {
    edges.iter().any(Edge::is_stale)
}

/// The sources a subscriber read during its last evaluation.
#[derive(Default)]
pub(crate) struct Dependencies {
    edges: IndexMap<NodeId, Edge>,
}

impl Dependencies {
    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.edges.contains_key(&id)
    }

    /// Copy the edges out so they can be checked without holding a lock.
    pub(crate) fn snapshot(&self) -> Vec<Edge> {
        self.edges.values().cloned().collect()
    }

    /// Replace these dependencies with `next`, unsubscribing `observer` from
    /// every source that was not read again.
    pub(crate) fn replace(&mut self, next: Dependencies, observer: NodeId) {
        for (id, edge) in &self.edges {
            if !next.contains(*id) {
                edge.source.observers().unsubscribe(observer);
            }
        }
        *self = next;
    }

    /// Drop every edge, unsubscribing `observer` from all sources.
    pub(crate) fn clear(&mut self, observer: NodeId) {
        for edge in self.edges.values() {
            edge.source.observers().unsubscribe(observer);
        }
        self.edges.clear();
    }

    /// Unsubscribe `observer` from the sources in `self` that `keep` rejects.
    /// Used to release a superseded run's reads.
    pub(crate) fn release_except(self, observer: NodeId, keep: impl Fn(NodeId) -> bool) {
        for (id, edge) in self.edges {
            if !keep(id) {
                edge.source.observers().unsubscribe(observer);
            }
        }
    }
}

/// Collects the reads of one evaluation.
///
/// The first read of a source subscribes the observer right away, so a
/// change that lands while an async run is still suspended is not missed.
pub(crate) struct Tracker {
    observer_id: NodeId,
    observer: Weak<dyn Observer>,
    collected: Mutex<Dependencies>,
}

impl Tracker {
    pub(crate) fn new(observer_id: NodeId, observer: Weak<dyn Observer>) -> Arc<Self> {
        Arc::new(Self {
            observer_id,
            observer,
            collected: Mutex::new(Dependencies::default()),
        })
    }

    pub(crate) fn observer_id(&self) -> NodeId {
        self.observer_id
    }

    /// Record a read of `source`.
    pub(crate) fn track(&self, source: Arc<dyn Source>) {
        let live = self
            .observer
            .upgrade()
            .is_some_and(|observer| !observer.is_disposed());
        if !live {
            return;
        }

        let id = source.id();
        let mut collected = self.collected.lock();
        // A node reading itself is reported as circular, never recorded.
        if id == self.observer_id || collected.contains(id) {
            return;
        }
        let version = source.version();
        graph_trace!(observer = %self.observer_id, source = %id, kind = ?source.kind(), version, "track");
        source.observers().subscribe(self.observer_id, self.observer.clone());
        collected.edges.insert(id, Edge { source, version });
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.collected.lock().contains(id)
    }

    pub(crate) fn snapshot(&self) -> Vec<Edge> {
        self.collected.lock().snapshot()
    }

    /// Take the collected dependencies, leaving the tracker empty.
    pub(crate) fn finish(&self) -> Dependencies {
        std::mem::take(&mut *self.collected.lock())
    }
}
