//! Hierarchical cancellation scopes with retain-counted teardown.
//!
//! # State Machine
//!
//! ```text
//! Active(retains, sealed) ──cancel, retains > 0──► Cancelling(cause, retains)
//!     │                                                 │
//!     │ cancel with 0 retains, or                       │ last release
//!     │ sealed and last release                         ▼
//!     └──────────────────────────────────────────► Completed(cause?)
//! ```
//!
//! No transition ever returns to `Active`. Every transition is a CAS on an
//! immutable state snapshot; the thread that wins a transition is the one
//! that runs the hooks attached to the state it left.
//!
//! # Retains
//!
//! Each child scope holds one retain on its parent until the child completes,
//! and a launched scope holds one retain on itself while its body runs. A
//! scope cannot complete while retained, so a cancelled parent stays
//! `Cancelling` until every descendant has finished tearing down.
//!
//! # Normal completion
//!
//! [`WorkScope::complete`] seals an active scope. A sealed scope completes
//! without a cause once its last retain is released. A launched scope seals
//! itself when its body returns `Ok`.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;

use super::hooks::{HookCell, HookChain};
use crate::cx::Cx;
use crate::error::Result;
use crate::runtime::worker::{catch_panics, spawn_worker};
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, ScopeId};
use crate::util::compare_and_set;

type CompletionArg = Option<CancelReason>;

enum ScopeState {
    Active {
        retain_count: usize,
        sealed: bool,
        on_cancel: HookChain<CancelReason>,
        on_complete: HookChain<CompletionArg>,
    },
    Cancelling {
        cause: CancelReason,
        retain_count: usize,
        on_complete: HookChain<CompletionArg>,
    },
    Completed {
        cause: CompletionArg,
    },
}

impl ScopeState {
    const fn fresh() -> Self {
        Self::Active {
            retain_count: 0,
            sealed: false,
            on_cancel: HookChain::empty(),
            on_complete: HookChain::empty(),
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Active { sealed: false, .. } => "active",
            Self::Active { sealed: true, .. } => "sealed",
            Self::Cancelling { .. } => "cancelling",
            Self::Completed { .. } => "completed",
        }
    }
}

struct ScopeInner {
    id: ScopeId,
    parent: Option<WorkScope>,
    state: ArcSwap<ScopeState>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // Nobody can reach an abandoned active scope any more; complete it
        // so that its parent is released.
        let state = self.state.load_full();
        if let ScopeState::Active {
            retain_count,
            on_complete,
            ..
        } = &*state
        {
            debug_assert_eq!(*retain_count, 0, "retained scope dropped");
            trace!(scope_id = %self.id, "abandoned scope completed");
            on_complete.fire(&None);
        }
    }
}

/// A node in a cancellation tree.
///
/// Handles are cheap clones of one shared scope.
#[derive(Clone)]
pub struct WorkScope {
    inner: Arc<ScopeInner>,
}

impl WorkScope {
    /// Creates a root scope.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(None, ScopeState::fresh())
    }

    fn with_state(parent: Option<Self>, state: ScopeState) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId::next(),
                parent,
                state: ArcSwap::from_pointee(state),
            }),
        }
    }

    /// Returns this scope's id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Returns the parent scope, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Returns true while the scope has not been cancelled or completed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(**self.inner.state.load(), ScopeState::Active { .. })
    }

    /// Returns true while cancelled but still waiting for releases.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        matches!(**self.inner.state.load(), ScopeState::Cancelling { .. })
    }

    /// Returns true once the scope has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(**self.inner.state.load(), ScopeState::Completed { .. })
    }

    /// Returns the number of outstanding retains.
    #[must_use]
    pub fn retain_count(&self) -> usize {
        match **self.inner.state.load() {
            ScopeState::Active { retain_count, .. } | ScopeState::Cancelling { retain_count, .. } => {
                retain_count
            }
            ScopeState::Completed { .. } => 0,
        }
    }

    /// Returns the cancellation cause, if the scope has been cancelled.
    #[must_use]
    pub fn cause(&self) -> Option<CancelReason> {
        match &**self.inner.state.load() {
            ScopeState::Active { .. } => None,
            ScopeState::Cancelling { cause, .. } => Some(cause.clone()),
            ScopeState::Completed { cause } => cause.clone(),
        }
    }

    /// Adds one retain. Fails with the scope's cause once it is no longer active.
    ///
    /// # Panics
    ///
    /// Panics if the retain count would overflow.
    pub(crate) fn try_retain(&self) -> core::result::Result<(), CompletionArg> {
        loop {
            let current = self.inner.state.load_full();
            match &*current {
                ScopeState::Active {
                    retain_count,
                    sealed,
                    on_cancel,
                    on_complete,
                } => {
                    assert!(
                        *retain_count < usize::MAX,
                        "scope {} retain count overflow",
                        self.id()
                    );
                    let next = ScopeState::Active {
                        retain_count: retain_count + 1,
                        sealed: *sealed,
                        on_cancel: on_cancel.clone(),
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        return Ok(());
                    }
                }
                ScopeState::Cancelling { cause, .. } => return Err(Some(cause.clone())),
                ScopeState::Completed { cause } => return Err(cause.clone()),
            }
        }
    }

    /// Drops one retain, completing the scope if it was the last one and the
    /// scope is cancelling or sealed.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding retain.
    pub(crate) fn release(&self) {
        loop {
            let current = self.inner.state.load_full();
            match &*current {
                ScopeState::Active {
                    retain_count: 0, ..
                }
                | ScopeState::Cancelling {
                    retain_count: 0, ..
                }
                | ScopeState::Completed { .. } => {
                    panic!(
                        "scope {} released in state {} without a matching retain",
                        self.id(),
                        current.name()
                    );
                }
                ScopeState::Active {
                    retain_count: 1,
                    sealed: true,
                    on_complete,
                    ..
                } => {
                    let on_complete = on_complete.clone();
                    if compare_and_set(&self.inner.state, &current, ScopeState::Completed { cause: None }) {
                        trace!(scope_id = %self.id(), "scope completed normally");
                        on_complete.fire(&None);
                        return;
                    }
                }
                ScopeState::Active {
                    retain_count,
                    sealed,
                    on_cancel,
                    on_complete,
                } => {
                    let next = ScopeState::Active {
                        retain_count: retain_count - 1,
                        sealed: *sealed,
                        on_cancel: on_cancel.clone(),
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        return;
                    }
                }
                ScopeState::Cancelling {
                    cause,
                    retain_count: 1,
                    on_complete,
                } => {
                    let (cause, on_complete) = (cause.clone(), on_complete.clone());
                    let next = ScopeState::Completed {
                        cause: Some(cause.clone()),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        trace!(scope_id = %self.id(), cause = %cause, "cancelled scope drained");
                        on_complete.fire(&Some(cause));
                        return;
                    }
                }
                ScopeState::Cancelling {
                    cause,
                    retain_count,
                    on_complete,
                } => {
                    let next = ScopeState::Cancelling {
                        cause: cause.clone(),
                        retain_count: retain_count - 1,
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        return;
                    }
                }
            }
        }
    }

    /// Marks the scope as finished normally.
    ///
    /// Completes immediately without a cause if nothing retains the scope;
    /// otherwise it completes when the last retain is released. Returns true
    /// if this call completed the scope. Has no effect once cancelled.
    pub fn complete(&self) -> bool {
        loop {
            let current = self.inner.state.load_full();
            match &*current {
                ScopeState::Active {
                    retain_count: 0,
                    on_complete,
                    ..
                } => {
                    let on_complete = on_complete.clone();
                    if compare_and_set(&self.inner.state, &current, ScopeState::Completed { cause: None }) {
                        trace!(scope_id = %self.id(), "scope completed normally");
                        on_complete.fire(&None);
                        return true;
                    }
                }
                ScopeState::Active {
                    retain_count,
                    sealed: false,
                    on_cancel,
                    on_complete,
                } => {
                    let next = ScopeState::Active {
                        retain_count: *retain_count,
                        sealed: true,
                        on_cancel: on_cancel.clone(),
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        trace!(scope_id = %self.id(), retains = retain_count, "scope sealed");
                        return false;
                    }
                }
                ScopeState::Active { sealed: true, .. }
                | ScopeState::Cancelling { .. }
                | ScopeState::Completed { .. } => return false,
            }
        }
    }

    /// Cancels the scope and, through the cancellation hooks, every live
    /// descendant.
    ///
    /// The first reason becomes the terminal cause. A scope that is already
    /// cancelled records `reason` as a secondary reason of that cause.
    /// Returns true if this call performed the cancellation.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        loop {
            let current = self.inner.state.load_full();
            match &*current {
                ScopeState::Active {
                    retain_count: 0,
                    on_cancel,
                    on_complete,
                    ..
                } => {
                    let (on_cancel, on_complete) = (on_cancel.clone(), on_complete.clone());
                    let next = ScopeState::Completed {
                        cause: Some(reason.clone()),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        debug!(scope_id = %self.id(), cause = %reason, "scope cancelled and completed");
                        on_cancel.fire(&reason);
                        on_complete.fire(&Some(reason));
                        return true;
                    }
                }
                ScopeState::Active {
                    retain_count,
                    on_cancel,
                    on_complete,
                    ..
                } => {
                    let on_cancel = on_cancel.clone();
                    let next = ScopeState::Cancelling {
                        cause: reason.clone(),
                        retain_count: *retain_count,
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        debug!(
                            scope_id = %self.id(),
                            cause = %reason,
                            retains = retain_count,
                            "scope cancelling"
                        );
                        on_cancel.fire(&reason);
                        return true;
                    }
                }
                ScopeState::Cancelling { cause, .. }
                | ScopeState::Completed { cause: Some(cause) } => {
                    cause.add_secondary(reason);
                    return false;
                }
                ScopeState::Completed { cause: None } => return false,
            }
        }
    }

    /// Registers `hook` to run when the scope is cancelled.
    ///
    /// Runs immediately if the scope is already cancelled. Dropped without
    /// running if the scope completes normally.
    pub fn invoke_on_cancellation(&self, hook: impl FnOnce(&CancelReason) + Send + 'static) {
        self.add_cancel_cell(&HookCell::new(hook));
    }

    fn add_cancel_cell(&self, cell: &Arc<HookCell<CancelReason>>) {
        loop {
            let current = self.inner.state.load_full();
            match &*current {
                ScopeState::Active {
                    retain_count,
                    sealed,
                    on_cancel,
                    on_complete,
                } => {
                    let next = ScopeState::Active {
                        retain_count: *retain_count,
                        sealed: *sealed,
                        on_cancel: on_cancel.with(cell),
                        on_complete: on_complete.clone(),
                    };
                    if compare_and_set(&self.inner.state, &current, next) {
                        return;
                    }
                }
                ScopeState::Cancelling { cause, .. }
                | ScopeState::Completed { cause: Some(cause) } => {
                    cell.fire(cause);
                    return;
                }
                ScopeState::Completed { cause: None } => return,
            }
        }
    }

    /// Registers `hook` to run when the scope completes, with the
    /// cancellation cause if there was one.
    ///
    /// Runs immediately if the scope is already completed. A panicking hook
    /// is logged and does not affect other hooks or the scope.
    pub fn invoke_on_completion(
        &self,
        hook: impl FnOnce(Option<&CancelReason>) + Send + 'static,
    ) {
        self.add_completion_cell(&HookCell::new(move |cause: &CompletionArg| {
            hook(cause.as_ref());
        }));
    }

    fn add_completion_cell(&self, cell: &Arc<HookCell<CompletionArg>>) {
        loop {
            let current = self.inner.state.load_full();
            let next = match &*current {
                ScopeState::Active {
                    retain_count,
                    sealed,
                    on_cancel,
                    on_complete,
                } => ScopeState::Active {
                    retain_count: *retain_count,
                    sealed: *sealed,
                    on_cancel: on_cancel.clone(),
                    on_complete: on_complete.with(cell),
                },
                ScopeState::Cancelling {
                    cause,
                    retain_count,
                    on_complete,
                } => ScopeState::Cancelling {
                    cause: cause.clone(),
                    retain_count: *retain_count,
                    on_complete: on_complete.with(cell),
                },
                ScopeState::Completed { cause } => {
                    cell.fire(cause);
                    return;
                }
            };
            if compare_and_set(&self.inner.state, &current, next) {
                return;
            }
        }
    }

    /// Creates a child scope.
    ///
    /// The child retains this scope until it completes and is cancelled
    /// whenever this scope is. A child of a scope that is no longer active is
    /// born completed.
    #[must_use]
    pub fn child_scope(&self) -> Self {
        match self.try_retain() {
            Ok(()) => {
                let child = Self::with_state(Some(self.clone()), ScopeState::fresh());
                let weak: Weak<ScopeInner> = Arc::downgrade(&child.inner);
                let propagate = HookCell::new(move |cause: &CancelReason| {
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.cancel(CancelReason::parent_cancelled(cause));
                    }
                });
                self.add_cancel_cell(&propagate);
                let parent = self.clone();
                child.invoke_on_completion(move |_| {
                    propagate.disarm();
                    parent.release();
                });
                trace!(scope_id = %child.id(), parent = %self.id(), "child scope created");
                child
            }
            Err(cause) => {
                trace!(parent = %self.id(), "child of finished scope born completed");
                Self::with_state(
                    Some(self.clone()),
                    ScopeState::Completed {
                        cause: cause.map(|c| CancelReason::parent_cancelled(&c)),
                    },
                )
            }
        }
    }

    /// Runs `body` on a dedicated worker thread inside a new child scope.
    ///
    /// The child is retained while the body runs and its cancellation
    /// interrupts the worker. When the body returns `Ok` the child is sealed;
    /// on `Err` or panic it is cancelled with a
    /// [`Failure`](crate::CancelKind::Failure) reason carrying the error; an
    /// interruption caused by cancellation just releases it.
    pub fn launch<F>(&self, cx: &Cx, body: F) -> Self
    where
        F: FnOnce(&Cx, &Self) -> Result<()> + Send + 'static,
    {
        let scope = self.child_scope();
        if scope.try_retain().is_err() {
            debug!(parent = %self.id(), "launch into finished scope skipped");
            return scope;
        }

        let worker = cx.child();
        let target = worker.clone();
        scope.invoke_on_cancellation(move |_| target.interrupt());

        let runner = scope.clone();
        if let Err(err) = spawn_worker(&worker, "scope", move |cx| runner.run_launched(cx, body)) {
            scope.cancel(CancelReason::failure(err));
            scope.release();
        }
        scope
    }

    fn run_launched<F>(&self, cx: &Cx, body: F)
    where
        F: FnOnce(&Cx, &Self) -> Result<()>,
    {
        match catch_panics(|| body(cx, self)) {
            Ok(()) => {
                self.complete();
            }
            Err(err) if err.is_interrupted() && !self.is_active() => {
                trace!(scope_id = %self.id(), "launched body stopped by cancellation");
            }
            Err(err) => {
                debug!(scope_id = %self.id(), error = %err, "launched body failed");
                self.cancel(CancelReason::failure(err));
            }
        }
        self.release();
    }

    /// Blocks until the scope completes and returns its cause.
    ///
    /// `Ok(None)` means normal completion. Returns `Err(Interrupted)` if the
    /// waiting thread is interrupted.
    ///
    /// # Panics
    ///
    /// Panics if called off the thread `cx` is bound to.
    #[allow(clippy::result_large_err)]
    pub fn join(&self, cx: &Cx) -> Result<Option<CancelReason>> {
        cx.assert_current("WorkScope::join");
        if let ScopeState::Completed { cause } = &**self.inner.state.load() {
            return Ok(cause.clone());
        }
        let waiter = cx.clone();
        let wake = HookCell::new(move |_: &CompletionArg| waiter.unpark());
        self.add_completion_cell(&wake);
        loop {
            if let ScopeState::Completed { cause } = &**self.inner.state.load() {
                return Ok(cause.clone());
            }
            if let Err(interrupted) = cx.checkpoint() {
                wake.disarm();
                return Err(interrupted);
            }
            cx.park();
        }
    }

    /// Cancels the scope with a [`Timeout`](crate::CancelKind::Timeout)
    /// reason after `delay` unless it completes first.
    ///
    /// The timer runs on its own worker and does not retain the scope.
    #[allow(clippy::result_large_err)]
    pub fn cancel_after(&self, cx: &Cx, delay: Duration) -> Result<()> {
        let timer = cx.child();
        let stop = timer.clone();
        self.invoke_on_completion(move |_| stop.interrupt());

        let target = Arc::downgrade(&self.inner);
        spawn_worker(&timer, "timer", move |cx| {
            if cx.sleep(delay).is_ok() {
                if let Some(inner) = target.upgrade() {
                    Self { inner }.cancel(CancelReason::timeout());
                }
            }
        })
    }
}

impl Default for WorkScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.load();
        f.debug_struct("WorkScope")
            .field("id", &self.inner.id)
            .field("parent", &self.parent().map(Self::id))
            .field("state", &state.name())
            .field("retain_count", &self.retain_count())
            .finish()
    }
}
