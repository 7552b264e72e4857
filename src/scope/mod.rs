//! Cancellation scopes.
//!
//! A [`WorkScope`] is a node in a tree. Cancelling a node cancels every live
//! descendant, and a node completes only after all of its descendants have.
//! Work is attached to a scope with [`WorkScope::launch`], which runs a body
//! on its own worker thread in a fresh child scope.
//!
//! Unlike a [`TaskGroup`](crate::TaskGroup), a scope is not tied to an owner
//! thread: any thread holding a handle may launch into it, cancel it, or
//! join it.

mod hooks;
mod presence;
mod work_scope;

pub use presence::{additions_and_removals, launch_while_present, Change};
pub use work_scope::WorkScope;
