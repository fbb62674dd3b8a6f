//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Default bound on outer flush iterations before a cycle is reported.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 100;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
///
/// Deserializes with missing fields filled from [`Default`], so hosts can
/// embed it in their own configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times a single flush may re-drain the pending queue before
    /// it gives up with `ReactiveCycleExceeded`.
    pub max_flush_iterations: usize,
}

impl RuntimeConfig {
    /// Set the flush iteration bound.
    pub fn with_max_flush_iterations(mut self, limit: usize) -> Self {
        self.max_flush_iterations = limit;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}
