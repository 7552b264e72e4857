//! Tasks and task groups.
//!
//! A [`Task`] is one body running on its own worker thread, owned by a
//! [`TaskGroup`]. The group's owner is the only thread allowed to spawn into
//! it or join its tasks, and [`task_group`] does not return until every task
//! has ended.

mod group;
#[allow(clippy::module_inception)]
mod task;

pub use group::{task_group, TaskGroup};
pub use task::Task;
