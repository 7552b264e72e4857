//! The capability context type.
//!
//! `Cx` is the token every blocking operation in schism goes through:
//! - Querying identity (task ID, bound thread)
//! - Interrupting a thread and observing that interruption
//! - Parking and unparking the bound thread
//! - Reaching the inherited [`RuntimeConfig`]
//!
//! # Explicit Context
//!
//! There is no thread-local "current task". A root `Cx` is built once on a
//! thread with [`Cx::root`] or [`Cx::builder`], and each worker spawned by
//! the runtime receives its own child `Cx` as an argument. Operations that
//! are restricted to an owner thread (joining a task, polling a
//! subscription) compare the calling thread against the thread the `Cx` is
//! bound to and panic on mismatch.
//!
//! # Interruption
//!
//! Interruption is the thread-level cancellation signal. [`Cx::interrupt`]
//! sets a sticky flag and unparks the bound thread; blocking operations
//! observe the flag through [`Cx::checkpoint`], which consumes it and returns
//! [`ErrorKind::Interrupted`](crate::ErrorKind::Interrupted).
//!
//! # Thread Safety
//!
//! `Cx` is `Send + Sync` and cheap to clone. Handing a clone to another thread
//! is how that thread gains the ability to wake or interrupt the owner.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::runtime::builder::CxBuilder;
use crate::runtime::config::RuntimeConfig;
use crate::tracing_compat::{trace, warn};
use crate::types::TaskId;

/// The capability context of one thread of execution.
#[derive(Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

struct CxInner {
    id: TaskId,
    thread: OnceLock<Thread>,
    interrupted: AtomicBool,
    config: Arc<RuntimeConfig>,
}

impl Cx {
    /// Binds a new root context to the calling thread.
    ///
    /// Uses the default configuration with `SCHISM_*` environment overrides.
    /// An unparseable variable is logged and ignored.
    #[must_use]
    pub fn root() -> Self {
        match CxBuilder::new().with_env_overrides() {
            Ok(builder) => builder.build(),
            Err(err) => {
                warn!(error = %err, "ignoring invalid environment configuration");
                CxBuilder::new().build()
            }
        }
    }

    /// Returns a builder for a root context with explicit configuration.
    #[must_use]
    pub fn builder() -> CxBuilder {
        CxBuilder::new()
    }

    pub(crate) fn with_config(config: Arc<RuntimeConfig>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                id: TaskId::next(),
                thread: OnceLock::new(),
                interrupted: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Creates an unbound context for a worker about to be spawned.
    pub(crate) fn child(&self) -> Self {
        Self::with_config(Arc::clone(&self.inner.config))
    }

    /// Binds this context to `thread`. Later calls are ignored.
    pub(crate) fn bind(&self, thread: Thread) {
        let _ = self.inner.thread.set(thread);
    }

    /// Binds this context to the calling thread.
    pub(crate) fn bind_current(&self) {
        self.bind(thread::current());
    }

    /// Returns the id of this context.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.id
    }

    /// Returns the id of the bound thread, if bound yet.
    #[must_use]
    pub fn thread_id(&self) -> Option<thread::ThreadId> {
        self.inner.thread.get().map(Thread::id)
    }

    /// Returns the configuration inherited from the root context.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn config_arc(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.inner.config)
    }

    /// Returns true if the calling thread is the thread this context is bound to.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Panics unless called from the bound thread.
    ///
    /// Owner-only operations call this; a violation is a programming error.
    #[track_caller]
    pub fn assert_current(&self, operation: &str) {
        assert!(
            self.is_current(),
            "{operation} called from thread {:?}, but it is owned by {} on {:?}",
            thread::current().id(),
            self.inner.id,
            self.thread_id(),
        );
    }

    /// Requests interruption of the bound thread.
    ///
    /// The flag stays set until a [`checkpoint`](Self::checkpoint) or
    /// [`clear_interrupt`](Self::clear_interrupt) consumes it.
    pub fn interrupt(&self) {
        if !self.inner.interrupted.swap(true, Ordering::SeqCst) {
            trace!(task_id = %self.inner.id, "interrupt requested");
        }
        self.unpark();
    }

    /// Returns true if an interrupt is pending.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Consumes a pending interrupt, returning whether one was pending.
    pub fn clear_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Returns `Err(Interrupted)` if an interrupt is pending, consuming it.
    #[allow(clippy::result_large_err)]
    pub fn checkpoint(&self) -> Result<()> {
        if self.clear_interrupt() {
            Err(Error::interrupted())
        } else {
            Ok(())
        }
    }

    /// Blocks the bound thread until it is unparked.
    ///
    /// May return spuriously; callers re-check their condition in a loop.
    pub fn park(&self) {
        debug_assert!(self.is_current(), "park called off the bound thread");
        thread::park();
    }

    /// Like [`park`](Self::park) with an upper bound on the wait.
    pub fn park_timeout(&self, timeout: Duration) {
        debug_assert!(self.is_current(), "park called off the bound thread");
        thread::park_timeout(timeout);
    }

    /// Wakes the bound thread if it is parked, or makes its next park return.
    pub fn unpark(&self) {
        if let Some(thread) = self.inner.thread.get() {
            thread.unpark();
        }
    }

    /// Sleeps for `duration`, returning early with `Err(Interrupted)` if
    /// interrupted.
    #[allow(clippy::result_large_err)]
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.park_timeout(deadline - now);
        }
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task_id", &self.inner.id)
            .field("thread", &self.thread_id())
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}
