//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds, and
//! effects, all tied to a [`Runtime`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (a computed or effect), the signal registers
//! that context as a dependent. When the value changes, all dependents are
//! notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is lazy: it
//! re-evaluates on read, and only when one of its dependencies really
//! changed. An evaluation that produces an equal value stops propagation.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects synchronize reactive state with external
//! systems, such as logging or network I/O.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically. Every evaluation installs a
//! tracker as the current context; reads check for one and record an edge
//! carrying the version they saw. A later version mismatch is what tells a
//! consumer it must run again.

mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use computed::{Computed, ComputedOptions};
pub use context::{untrack, ReactiveContext};
pub use effect::{Cleanup, Effect, EffectOutput, OnCleanup};
pub use runtime::Runtime;
pub use signal::Signal;
