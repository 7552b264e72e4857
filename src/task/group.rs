//! Owning collection of tasks with structured exit.
//!
//! [`task_group`] runs a body that may spawn tasks and does not return
//! until every one of them has ended:
//!
//! - **Normal exit** (body returned `Ok`): wait for all tasks. If the owner
//!   is interrupted while waiting, switch to failure exit with an
//!   interruption cause. Otherwise report the first task failure nobody
//!   joined, with the rest suppressed.
//! - **Failure exit** (body returned `Err` or panicked): interrupt every task
//!   still running, wait for all of them ignoring further interrupts, attach
//!   failures nobody joined to the cause and return it (or resume the panic).

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::task::{GroupShared, Task, TaskCell, TaskControl};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::worker::{catch_panics, spawn_worker};
use crate::tracing_compat::debug;

/// Runs `body` with a fresh [`TaskGroup`] owned by the thread of `cx`.
///
/// # Panics
///
/// Panics if called off the thread `cx` is bound to. A panic in `body` is
/// resumed after the group's tasks have been interrupted and drained.
#[allow(clippy::result_large_err)]
pub fn task_group<R, F>(cx: &Cx, body: F) -> Result<R>
where
    F: FnOnce(&TaskGroup<'_>) -> Result<R>,
{
    cx.assert_current("task_group");
    let group = TaskGroup::new(cx);
    match panic::catch_unwind(AssertUnwindSafe(|| body(&group))) {
        Ok(Ok(value)) => group.exit_normally().map(|()| value),
        Ok(Err(cause)) => Err(group.exit_with_cause(cause)),
        Err(payload) => {
            group.interrupt_active();
            group.drain_ignoring_interrupts();
            panic::resume_unwind(payload)
        }
    }
}

/// A set of tasks owned by one thread.
///
/// Created by [`task_group`]; `!Sync`, so only the owner can spawn into it.
pub struct TaskGroup<'cx> {
    cx: &'cx Cx,
    shared: Arc<GroupShared>,
    tasks: RefCell<Vec<Arc<dyn TaskControl>>>,
}

impl<'cx> TaskGroup<'cx> {
    fn new(cx: &'cx Cx) -> Self {
        Self {
            cx,
            shared: Arc::new(GroupShared::new(cx.clone())),
            tasks: RefCell::new(Vec::new()),
        }
    }

    /// Spawns `body` on a new worker thread.
    ///
    /// The body receives the worker's own [`Cx`]. Errors and panics are
    /// captured for [`Task::join`]. If the thread cannot be spawned the task
    /// is returned already failed with
    /// [`ErrorKind::SpawnFailed`](crate::ErrorKind::SpawnFailed).
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owner.
    pub fn task<R, F>(&self, body: F) -> Task<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&Cx) -> Result<R> + Send + 'static,
    {
        self.cx.assert_current("TaskGroup::task");
        let worker = self.cx.child();
        let cell = Arc::new(TaskCell::new(worker.clone(), Arc::clone(&self.shared)));
        self.shared.incomplete.fetch_add(1, Ordering::AcqRel);
        self.tasks
            .borrow_mut()
            .push(Arc::clone(&cell) as Arc<dyn TaskControl>);

        let runner = Arc::clone(&cell);
        let spawned = spawn_worker(&worker, "task", move |cx| {
            runner.finish(catch_panics(|| body(cx)));
        });
        if let Err(err) = spawned {
            cell.finish(Err(err));
        }
        Task::new(cell)
    }

    /// Returns the owner's context.
    #[must_use]
    pub fn owner(&self) -> &Cx {
        self.cx
    }

    /// Returns the number of tasks that have not ended yet.
    #[must_use]
    pub fn incomplete_count(&self) -> usize {
        self.shared.incomplete.load(Ordering::Acquire)
    }

    /// Returns the number of tasks spawned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Returns true if no task has been spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    fn exit_normally(&self) -> Result<()> {
        while self.incomplete_count() != 0 {
            if self.cx.clear_interrupt() {
                debug!(owner = %self.cx.task_id(), "task group interrupted while draining");
                return Err(self.exit_with_cause(Error::interrupted()));
            }
            self.cx.park();
        }

        let mut failures = self
            .tasks
            .borrow()
            .iter()
            .filter_map(|task| task.unjoined_failure())
            .map(Error::task_failed)
            .collect::<Vec<_>>()
            .into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                debug!(owner = %self.cx.task_id(), error = %first, "task group exit with unjoined failure");
                Err(failures.fold(first, Error::with_suppressed))
            }
        }
    }

    fn exit_with_cause(&self, mut cause: Error) -> Error {
        debug!(owner = %self.cx.task_id(), cause = %cause, "task group exit with cause");
        self.interrupt_active();
        let interrupted = self.drain_ignoring_interrupts();
        for task in self.tasks.borrow().iter() {
            if let Some(failure) = task.unjoined_failure() {
                if !failure.is_interrupted() {
                    cause.add_suppressed(Error::task_failed(failure));
                }
            }
        }
        if interrupted {
            // Hand the swallowed interrupt back to the owner.
            self.cx.interrupt();
        }
        cause
    }

    fn interrupt_active(&self) {
        for task in self.tasks.borrow().iter() {
            if !task.is_finished() {
                task.interrupt();
            }
        }
    }

    /// Waits for every task, returning whether an interrupt was swallowed.
    fn drain_ignoring_interrupts(&self) -> bool {
        let mut interrupted = false;
        while self.incomplete_count() != 0 {
            if self.cx.clear_interrupt() {
                interrupted = true;
                continue;
            }
            self.cx.park();
        }
        interrupted
    }
}

impl fmt::Debug for TaskGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("owner", &self.cx.task_id())
            .field("tasks", &self.len())
            .field("incomplete", &self.incomplete_count())
            .finish()
    }
}
