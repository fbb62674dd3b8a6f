//! Cascade Core
//!
//! This crate provides a fine-grained reactive engine. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Glitch-free push/pull propagation with equality cut-off
//! - Batched effect scheduling with a bounded flush
//! - Async effects on tokio with per-task dependency tracking
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Node identity, observer sets and the effect scheduler
//! - `config`: Runtime tunables
//! - `error`: Error types shared by every operation
//! - `debug`: Process-wide graph tracing toggle
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::{create_computed, create_effect, create_signal};
//!
//! // Create a signal
//! let count = create_signal(0);
//!
//! // Create a derived value
//! let doubled = create_computed({
//!     let count = count.clone();
//!     move || Ok(count.get() * 2)
//! });
//!
//! // Create an effect
//! let _effect = create_effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || -> Result<(), cascade_core::ReactiveError> {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get()?);
//!         Ok(())
//!     }
//! })?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```
//!
//! The free functions operate on the calling thread's default [`Runtime`].
//! Use the methods on an explicit `Runtime` for independent graphs.

pub mod config;
pub mod debug;
pub mod error;
pub mod graph;
pub mod reactive;

use std::future::Future;

pub use config::RuntimeConfig;
pub use debug::{is_debug, set_debug};
pub use error::{BoxError, ComputeResult, ReactiveError, Result};
pub use graph::{NodeId, NodeKind};
pub use reactive::{
    untrack, Cleanup, Computed, ComputedOptions, Effect, EffectOutput, OnCleanup, Runtime, Signal,
};

/// Create a signal on the current thread's runtime.
pub fn create_signal<T>(value: T) -> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Runtime::current().signal(value)
}

/// Create a signal with a custom equality predicate.
pub fn create_signal_with<T, F>(value: T, equal: F) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    Runtime::current().signal_with(value, equal)
}

/// Create a computed value on the current thread's runtime.
pub fn create_computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> ComputeResult<T> + Send + Sync + 'static,
{
    Runtime::current().computed(compute)
}

/// Create a computed value with a fallback and/or custom equality.
pub fn create_computed_with<T, F>(compute: F, options: ComputedOptions<T>) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> ComputeResult<T> + Send + Sync + 'static,
{
    Runtime::current().computed_with(compute, options)
}

/// Create an effect on the current thread's runtime and run it once.
pub fn create_effect<F, R>(f: F) -> Result<Effect>
where
    F: FnMut() -> R + Send + 'static,
    R: EffectOutput,
{
    Runtime::current().effect(f)
}

/// Create an effect that registers cleanups through [`OnCleanup`].
pub fn create_effect_with_cleanup<F, R>(f: F) -> Result<Effect>
where
    F: FnMut(&OnCleanup) -> R + Send + 'static,
    R: EffectOutput,
{
    Runtime::current().effect_with_cleanup(f)
}

/// Create an async effect on the current thread's runtime.
pub fn create_async_effect<F, Fut, R>(f: F) -> Result<Effect>
where
    F: Fn(OnCleanup) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: EffectOutput,
{
    Runtime::current().async_effect(f)
}

/// Group writes so dependent effects run once, after `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::current().batch(f)
}
