//! Dedicated worker threads.
//!
//! Every task, launched scope and actor runs on its own OS thread. There is
//! no pool: a worker is spawned for one body and exits when the body returns.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::tracing_compat::{trace, warn};
use crate::types::PanicPayload;

/// Spawns a worker thread for `cx` and runs `body` on it.
///
/// `cx` must be a fresh child context; it is bound to the new thread before
/// this function returns, so it can be unparked or interrupted immediately.
/// If the OS refuses the thread, `body` is dropped without running.
#[allow(clippy::result_large_err)]
pub(crate) fn spawn_worker<F>(cx: &Cx, role: &'static str, body: F) -> Result<()>
where
    F: FnOnce(&Cx) + Send + 'static,
{
    let config = cx.config_arc();
    let name = config.thread_name(role, cx.task_id());
    let worker_cx = cx.clone();

    let spawned = thread::Builder::new()
        .name(name)
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            worker_cx.bind_current();
            if let Some(ref callback) = config.on_thread_start {
                callback();
            }
            trace!(task_id = %worker_cx.task_id(), role, "worker started");

            body(&worker_cx);

            trace!(task_id = %worker_cx.task_id(), role, "worker exited");
            if let Some(ref callback) = config.on_thread_stop {
                callback();
            }
        });

    match spawned {
        Ok(handle) => {
            cx.bind(handle.thread().clone());
            Ok(())
        }
        Err(err) => {
            warn!(task_id = %cx.task_id(), role, error = %err, "failed to spawn worker");
            Err(Error::spawn_failed(err))
        }
    }
}

/// Runs `f`, converting a panic into an [`ErrorKind::Panicked`](crate::ErrorKind::Panicked) error.
#[allow(clippy::result_large_err)]
pub(crate) fn catch_panics<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::panicked(&PanicPayload::from_any(payload.as_ref()))),
    }
}
