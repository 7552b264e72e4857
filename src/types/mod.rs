//! Core types shared by every primitive.
//!
//! - [`id`]: Identifier types (`TaskId`, `ScopeId`)
//! - [`outcome`]: Four-valued outcome of a task join
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{ScopeId, TaskId};
pub use outcome::{Outcome, PanicPayload};
