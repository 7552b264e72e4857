//! Thread synchronization primitives.
//!
//! - [`MutableObservable`] / [`Observable`]: single-value broadcast with
//!   conflating per-subscriber mailboxes
//! - [`SharedLifetime`]: retain-counted barrier that drains and closes once
//! - [`BlockingFlow`]: cold streams collected on the calling thread, with
//!   observables as never-ending flows of distinct values
//!
//! All of them block by parking the waiting thread; none uses condition
//! variables.

mod flow;
mod lifetime;
mod observable;

pub use flow::{blocking_flow, BlockingFlow, Collector, FromFn, Transform};
pub use lifetime::{Retained, SharedLifetime};
pub use observable::{MutableObservable, Observable, Subscription};
