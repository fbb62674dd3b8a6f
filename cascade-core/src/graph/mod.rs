//! Dependency Graph
//!
//! This module holds the graph-level machinery shared by every reactive
//! primitive: node identity, the source/observer edge model, and the effect
//! scheduler.
//!
//! # Overview
//!
//! Edges run in two directions:
//!
//! - A consumer (computed or effect) holds its sources strongly, together
//!   with the version of each source it last saw.
//! - A source holds its observers weakly, in subscription order.
//!
//! A write walks the weak observer edges to mark computeds dirty and queue
//! effects. A read walks the strong source edges to decide whether anything
//! really changed before recomputing.

mod node;
mod scheduler;

pub use node::{default_equal, EqualFn, NodeId, NodeKind};
pub use scheduler::Scheduler;

pub(crate) use node::{Observer, ObserverSet, Source};
pub(crate) use scheduler::ScheduledEffect;
