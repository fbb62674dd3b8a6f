//! Process-wide trace toggle.
//!
//! Graph internals (writes, dirtying, subscriptions, flush iterations) are
//! chatty, so they only reach `tracing` when this toggle is on. Failures of
//! user callbacks are reported regardless.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Turn graph tracing on or off for the whole process.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Whether graph tracing is on.
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Emit a `tracing::debug!` event when the debug toggle is on.
macro_rules! graph_trace {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug() {
            tracing::debug!($($arg)*);
        }
    };
}

pub(crate) use graph_trace;
