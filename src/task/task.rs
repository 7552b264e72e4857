//! One-shot result holder for a task running on its own worker thread.
//!
//! The completion handshake uses a single atomic state:
//!
//! ```text
//! Initial ──join()──► JoinRequested
//!    │                     │
//!    └──── worker ends ────┴──► Completed(value) | Failed(error)
//! ```
//!
//! The worker swaps its terminal state in unconditionally. If it finds
//! `JoinRequested` there, the owner is parked in [`Task::join`] and gets
//! unparked. Terminal states never change again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, Outcome, PanicPayload, TaskId};
use crate::util::compare_and_set;

/// State of one task.
pub(crate) enum TaskState<R> {
    Initial,
    JoinRequested,
    Failed(Error),
    Completed(R),
}

impl<R> TaskState<R> {
    const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Completed(_))
    }
}

/// Bookkeeping shared by a group and all of its tasks.
pub(crate) struct GroupShared {
    pub(crate) owner: Cx,
    pub(crate) incomplete: AtomicUsize,
}

impl GroupShared {
    pub(crate) fn new(owner: Cx) -> Self {
        Self {
            owner,
            incomplete: AtomicUsize::new(0),
        }
    }
}

pub(crate) struct TaskCell<R> {
    state: ArcSwap<TaskState<R>>,
    worker: Cx,
    group: Arc<GroupShared>,
    joined: AtomicBool,
}

impl<R: Send + Sync + 'static> TaskCell<R> {
    pub(crate) fn new(worker: Cx, group: Arc<GroupShared>) -> Self {
        Self {
            state: ArcSwap::from_pointee(TaskState::Initial),
            worker,
            group,
            joined: AtomicBool::new(false),
        }
    }

    /// Called exactly once, by the worker or by a failed spawn.
    pub(crate) fn finish(&self, result: Result<R>) {
        let terminal = match result {
            Ok(value) => TaskState::Completed(value),
            Err(error) => TaskState::Failed(error),
        };
        let previous = self.state.swap(Arc::new(terminal));
        debug_assert!(!previous.is_terminal(), "task finished twice");
        trace!(task_id = %self.worker.task_id(), "task finished");
        if matches!(*previous, TaskState::JoinRequested) {
            self.group.owner.unpark();
        }
        if self.group.incomplete.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.group.owner.unpark();
        }
    }

    /// Parks the owner until the task is terminal.
    #[allow(clippy::result_large_err)]
    fn wait(&self) -> Result<Arc<TaskState<R>>> {
        let owner = &self.group.owner;
        owner.assert_current("Task::join");
        loop {
            let current = self.state.load_full();
            match &*current {
                TaskState::Completed(_) | TaskState::Failed(_) => {
                    self.joined.store(true, Ordering::Release);
                    return Ok(current);
                }
                TaskState::Initial => {
                    compare_and_set(&self.state, &current, TaskState::JoinRequested);
                }
                TaskState::JoinRequested => {
                    owner.checkpoint()?;
                    owner.park();
                }
            }
        }
    }
}

/// Type-erased view of a task used by its group.
pub(crate) trait TaskControl: Send + Sync {
    fn interrupt(&self);
    fn is_finished(&self) -> bool;
    /// The raw failure of a task that ended in error and was never joined.
    fn unjoined_failure(&self) -> Option<Error>;
}

impl<R: Send + Sync + 'static> TaskControl for TaskCell<R> {
    fn interrupt(&self) {
        self.worker.interrupt();
    }

    fn is_finished(&self) -> bool {
        self.state.load().is_terminal()
    }

    fn unjoined_failure(&self) -> Option<Error> {
        if self.joined.load(Ordering::Acquire) {
            return None;
        }
        match &**self.state.load() {
            TaskState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }
}

/// Handle to a task spawned by a [`TaskGroup`](super::TaskGroup).
///
/// Only the group's owner thread may join it.
pub struct Task<R> {
    cell: Arc<TaskCell<R>>,
}

impl<R: Send + Sync + 'static> Task<R> {
    pub(crate) fn new(cell: Arc<TaskCell<R>>) -> Self {
        Self { cell }
    }

    /// Returns the id of the task's worker context.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.worker.task_id()
    }

    /// Returns true once the body has returned, failed or panicked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cell.is_finished()
    }

    /// Interrupts the task's worker thread.
    pub fn interrupt(&self) {
        self.cell.worker.interrupt();
    }

    /// Blocks until the task ends and returns its value.
    ///
    /// A body error or panic is returned as [`ErrorKind::TaskFailed`]
    /// wrapping the original failure. If the owner is interrupted while
    /// waiting, returns `Err(Interrupted)` and leaves the task running; it
    /// can be joined again. Joining a finished task repeatedly returns the
    /// same result.
    ///
    /// [`ErrorKind::TaskFailed`]: crate::ErrorKind::TaskFailed
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the group's owner.
    #[allow(clippy::result_large_err)]
    pub fn join(&self) -> Result<R>
    where
        R: Clone,
    {
        let state = self.cell.wait()?;
        match &*state {
            TaskState::Completed(value) => Ok(value.clone()),
            TaskState::Failed(error) => Err(Error::task_failed(error.clone())),
            TaskState::Initial | TaskState::JoinRequested => {
                Err(Error::internal("task wait returned a non-terminal state"))
            }
        }
    }

    /// Blocks until the task ends and reports what happened without failing.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the group's owner.
    pub fn join_outcome(&self) -> Outcome<R, Error>
    where
        R: Clone,
    {
        match self.cell.wait() {
            Err(_) => Outcome::Cancelled(CancelReason::interrupted()),
            Ok(state) => match &*state {
                TaskState::Completed(value) => Outcome::Ok(value.clone()),
                TaskState::Failed(error) if error.is_panicked() => {
                    Outcome::Panicked(PanicPayload::new(error.message().unwrap_or_default()))
                }
                TaskState::Failed(error) => Outcome::Err(error.clone()),
                TaskState::Initial | TaskState::JoinRequested => {
                    Outcome::Err(Error::internal("task wait returned a non-terminal state"))
                }
            },
        }
    }
}

impl<R> fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &**self.cell.state.load() {
            TaskState::Initial => "initial",
            TaskState::JoinRequested => "join-requested",
            TaskState::Failed(_) => "failed",
            TaskState::Completed(_) => "completed",
        };
        f.debug_struct("Task")
            .field("id", &self.cell.worker.task_id())
            .field("state", &state)
            .finish()
    }
}
