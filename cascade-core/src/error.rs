//! Error types for the reactive graph.

use std::sync::Arc;

use crate::graph::NodeId;

/// Boxed error returned by user compute functions and effect callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of a computed's compute function.
///
/// Using a boxed error lets compute functions apply `?` to both their own
/// failures and to reads of other computeds.
pub type ComputeResult<T> = std::result::Result<T, BoxError>;

/// Result alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by the reactive graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReactiveError {
    /// A computed was read again while it was still evaluating.
    #[error("circular dependency detected while evaluating {node}")]
    CircularDependency { node: NodeId },

    /// A flush kept producing new work past the configured iteration bound.
    #[error("reactive cycle detected: effects still pending after {limit} flush iterations")]
    ReactiveCycleExceeded { limit: usize },

    /// A computed's compute function failed and it has no fallback.
    #[error("computed {node} failed: {source}")]
    ComputeFailed {
        node: NodeId,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// An async effect was created outside of a tokio runtime.
    #[error("async effects require a running tokio runtime")]
    NoAsyncRuntime,
}

impl ReactiveError {
    /// Whether this is a [`ReactiveError::CircularDependency`].
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}
