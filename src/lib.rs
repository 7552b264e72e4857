//! Schism: structured concurrency on dedicated threads.
//!
//! # Overview
//!
//! Schism runs every unit of concurrent work on its own OS thread and ties
//! that thread's lifetime to a structure: a [`TaskGroup`] that cannot return
//! before its tasks end, or a [`WorkScope`] tree whose nodes complete only
//! after their descendants. Blocking primitives park the calling thread and
//! are woken by an explicit unpark; shared state transitions are
//! compare-and-swap on immutable snapshots.
//!
//! # Core Guarantees
//!
//! - **No orphan threads**: a group or scope completes only after every
//!   worker it started has finished
//! - **Cancellation is a signal**: cancelling interrupts workers, which
//!   observe it at their next blocking call and tear down
//! - **One terminal cause**: concurrent cancellations collapse into the first
//!   cause, the rest are attached as secondary causes
//! - **Explicit context**: every blocking operation takes a [`Cx`]; there is
//!   no ambient "current task"
//!
//! # Module Structure
//!
//! - [`cx`]: The context type (identity, interruption, parking)
//! - [`task`]: Task groups with owner-thread join semantics
//! - [`scope`]: Cancellation scope trees and presence-driven launching
//! - [`sync`]: Observable values, blocking flows and shared lifetimes
//! - [`actor`]: State confined to one worker thread
//! - [`types`]: Identifiers, cancellation reasons, outcomes
//! - [`runtime`]: Worker thread configuration
//! - [`error`]: Error types
//! - [`tracing_compat`]: Logging macros that compile away without `tracing`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod actor;
pub mod cx;
pub mod error;
pub mod runtime;
pub mod scope;
pub mod sync;
pub mod task;
pub mod tracing_compat;
pub mod types;
pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use actor::Actor;
pub use cx::Cx;
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use runtime::{ConfigError, CxBuilder, RuntimeConfig};
pub use scope::{launch_while_present, Change, WorkScope};
pub use sync::{
    blocking_flow, BlockingFlow, Collector, MutableObservable, Observable, Retained, SharedLifetime,
    Subscription,
};
pub use task::{task_group, Task, TaskGroup};
pub use types::{CancelKind, CancelReason, Outcome, PanicPayload, ScopeId, TaskId};
