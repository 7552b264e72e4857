//! Mutual exclusion over state by confinement to one worker thread.
//!
//! An [`Actor`] owns a value of type `S` and a FIFO work queue. A single
//! worker, launched into a [`WorkScope`], pops blocks one at a time and runs
//! them against the state. Callers on any thread submit a block with
//! [`Actor::isolated`] and park until its result comes back.
//!
//! - **Ordering**: blocks run in enqueue order, never concurrently.
//! - **Errors**: a block's `Err` goes back to its caller; the actor keeps
//!   running.
//! - **Closure**: cancelling the scope, [`Actor::close`], or a panicking
//!   block stops the worker. The first such cause is recorded and every
//!   queued or later block fails with [`ErrorKind::ActorClosed`] carrying it.
//!
//! # Example
//!
//! ```ignore
//! let counter = Actor::new(&cx, &scope, 0_u64);
//! counter.isolated(&cx, |count| {
//!     *count += 1;
//!     Ok(())
//! })?;
//! let total = counter.isolated(&cx, |count| Ok(*count))?;
//! ```
//!
//! [`ErrorKind::ActorClosed`]: crate::ErrorKind::ActorClosed

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::scope::WorkScope;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, PanicPayload};

trait WorkItem<S>: Send {
    /// Runs the block. Returns the panic error if the block panicked.
    fn run(self: Box<Self>, state: &mut S) -> Option<Error>;

    /// Fails the block without running it.
    fn close(self: Box<Self>, cause: &Error);
}

struct Reply<R> {
    slot: Mutex<Option<Result<R>>>,
    caller: Cx,
}

impl<R> Reply<R> {
    fn fill(&self, result: Result<R>) {
        *self.slot.lock() = Some(result);
        self.caller.unpark();
    }
}

struct Call<S, R, F> {
    block: F,
    reply: Arc<Reply<R>>,
    _state: PhantomData<fn(&mut S)>,
}

impl<S, R, F> WorkItem<S> for Call<S, R, F>
where
    R: Send,
    F: FnOnce(&mut S) -> Result<R> + Send,
{
    fn run(self: Box<Self>, state: &mut S) -> Option<Error> {
        let Self { block, reply, .. } = *self;
        match panic::catch_unwind(AssertUnwindSafe(|| block(state))) {
            Ok(result) => {
                reply.fill(result);
                None
            }
            Err(payload) => {
                let err = Error::panicked(&PanicPayload::from_any(payload.as_ref()));
                reply.fill(Err(err.clone()));
                Some(err)
            }
        }
    }

    fn close(self: Box<Self>, cause: &Error) {
        self.reply.fill(Err(Error::actor_closed(cause)));
    }
}

struct ActorInner<S> {
    queue: SegQueue<Box<dyn WorkItem<S>>>,
    worker: OnceLock<Cx>,
    closed: OnceLock<Error>,
}

impl<S> ActorInner<S> {
    fn run(&self, cx: &Cx, scope: &WorkScope, mut state: S) -> Result<()> {
        let _ = self.worker.set(cx.clone());
        fence(Ordering::SeqCst);
        trace!(task_id = %cx.task_id(), "actor worker started");

        loop {
            if let Err(interrupted) = cx.checkpoint() {
                let cause = scope
                    .cause()
                    .map_or_else(|| interrupted.clone(), |reason| reason.to_error());
                self.close_with(cause);
                return Err(interrupted);
            }
            match self.queue.pop() {
                Some(item) => {
                    if let Some(fatal) = item.run(&mut state) {
                        self.close_with(fatal.clone());
                        return Err(fatal);
                    }
                }
                None => cx.park(),
            }
        }
    }

    /// Records `cause` if the actor is not closed yet, then fails every
    /// queued block.
    fn close_with(&self, cause: Error) {
        if self.closed.set(cause).is_ok() {
            debug!(cause = ?self.closed.get(), "actor closed");
        }
        fence(Ordering::SeqCst);
        self.drain_closed();
    }

    fn drain_closed(&self) {
        let Some(cause) = self.closed.get() else {
            return;
        };
        while let Some(item) = self.queue.pop() {
            item.close(cause);
        }
    }
}

/// State confined to one worker thread, reachable through queued blocks.
pub struct Actor<S> {
    inner: Arc<ActorInner<S>>,
    scope: WorkScope,
}

impl<S: Send + 'static> Actor<S> {
    /// Launches the actor's worker in a child of `scope`.
    ///
    /// If the worker cannot start (the scope is already cancelled, or the OS
    /// refuses the thread) the actor is born closed.
    pub fn new(cx: &Cx, scope: &WorkScope, state: S) -> Self {
        let inner = Arc::new(ActorInner {
            queue: SegQueue::new(),
            worker: OnceLock::new(),
            closed: OnceLock::new(),
        });
        let runner = Arc::clone(&inner);
        let worker_scope = scope.launch(cx, move |cx, scope| runner.run(cx, scope, state));

        if worker_scope.is_completed() && inner.closed.get().is_none() {
            let cause = worker_scope.cause().map_or_else(
                || Error::internal("actor worker never started"),
                |reason| reason.to_error(),
            );
            inner.close_with(cause);
        }
        Self {
            inner,
            scope: worker_scope,
        }
    }

    /// Runs `block` on the actor's worker with exclusive access to the state
    /// and returns its result.
    ///
    /// Returns `Err(ActorClosed)` if the actor is or becomes closed before
    /// the block runs, and `Err(Panicked)` if the block panics. If the
    /// calling thread is interrupted while waiting, returns
    /// `Err(Interrupted)`; the block stays queued and may still run.
    ///
    /// # Panics
    ///
    /// Panics if called off the thread `cx` is bound to.
    #[allow(clippy::result_large_err)]
    pub fn isolated<R, F>(&self, cx: &Cx, block: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R> + Send + 'static,
    {
        cx.assert_current("Actor::isolated");
        if let Some(cause) = self.inner.closed.get() {
            return Err(Error::actor_closed(cause));
        }

        let reply = Arc::new(Reply {
            slot: Mutex::new(None),
            caller: cx.clone(),
        });
        self.inner.queue.push(Box::new(Call {
            block,
            reply: Arc::clone(&reply),
            _state: PhantomData,
        }));
        fence(Ordering::SeqCst);
        if self.inner.closed.get().is_some() {
            self.inner.drain_closed();
        } else if let Some(worker) = self.inner.worker.get() {
            worker.unpark();
        }

        loop {
            if let Some(result) = reply.slot.lock().take() {
                return result;
            }
            cx.checkpoint()?;
            cx.park();
        }
    }
}

impl<S> Actor<S> {
    /// Stops the worker. Queued and later blocks fail with `ActorClosed`.
    pub fn close(&self) {
        self.scope.cancel(CancelReason::user("actor closed"));
    }

    /// Returns true once the actor has stopped accepting work.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get().is_some()
    }

    /// Returns the error that closed the actor.
    #[must_use]
    pub fn closed_cause(&self) -> Option<&Error> {
        self.inner.closed.get()
    }

    /// Returns the scope the worker runs in.
    #[must_use]
    pub const fn scope(&self) -> &WorkScope {
        &self.scope
    }

    /// Returns the number of blocks waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

impl<S> Clone for Actor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scope: self.scope.clone(),
        }
    }
}

impl<S> fmt::Debug for Actor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("scope", &self.scope.id())
            .field("queued", &self.inner.queue.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
