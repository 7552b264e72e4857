//! Capability context.
//!
//! The [`Cx`] type is the explicit per-thread context passed to every body
//! the runtime runs. It replaces any ambient "current task" lookup: code that
//! needs to block, be interrupted, or spawn work receives a `Cx` argument.
//!
//! ```ignore
//! use schism::{task_group, Cx};
//!
//! let cx = Cx::root();
//! let sum = task_group(&cx, |group| {
//!     let a = group.task(|_cx| Ok(20));
//!     let b = group.task(|_cx| Ok(22));
//!     Ok(a.join()? + b.join()?)
//! })?;
//! assert_eq!(sum, 42);
//! ```

pub mod cx;

pub use cx::Cx;
