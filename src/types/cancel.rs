//! Cancellation reason and kind types.
//!
//! Cancellation in schism is a first-class protocol, not a silent drop.
//! A [`CancelReason`] records why a scope was cancelled. The first reason
//! delivered to a scope becomes its terminal cause; every later one is kept
//! as a secondary reason on that first cause.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation requested by a timer.
    Timeout,
    /// The body running in the scope failed or panicked.
    Failure,
    /// A blocked wait was interrupted.
    Interrupted,
    /// Cancellation due to the parent scope being cancelled.
    ParentCancelled,
    /// Cancellation due to shutdown of the owning component.
    Shutdown,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::Failure => write!(f, "failure"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason for a cancellation.
///
/// A reason is a cheap handle: clones share the same secondary list, so a
/// reason attached to a scope that is already cancelling is visible through
/// every copy of that scope's cause.
#[derive(Clone)]
pub struct CancelReason {
    inner: Arc<ReasonInner>,
}

struct ReasonInner {
    kind: CancelKind,
    message: Option<String>,
    failure: Option<Error>,
    origin: Option<CancelReason>,
    secondary: Mutex<Vec<CancelReason>>,
}

impl CancelReason {
    fn build(
        kind: CancelKind,
        message: Option<String>,
        failure: Option<Error>,
        origin: Option<Self>,
    ) -> Self {
        Self {
            inner: Arc::new(ReasonInner {
                kind,
                message,
                failure,
                origin,
                secondary: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub fn new(kind: CancelKind) -> Self {
        Self::build(kind, None, None, None)
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::build(CancelKind::User, Some(message.into()), None, None)
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Creates a shutdown cancellation reason.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Creates the reason used when a waiting thread was interrupted.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(CancelKind::Interrupted)
    }

    /// Creates a reason carrying the failure of a scope body.
    #[must_use]
    pub fn failure(error: Error) -> Self {
        Self::build(CancelKind::Failure, None, Some(error), None)
    }

    /// Creates the reason a child receives when its parent is cancelled.
    #[must_use]
    pub fn parent_cancelled(parent: &Self) -> Self {
        Self::build(CancelKind::ParentCancelled, None, None, Some(parent.clone()))
    }

    /// Adds a message to this reason.
    #[must_use]
    pub fn with_message(self, message: impl Into<String>) -> Self {
        Self::build(
            self.inner.kind,
            Some(message.into()),
            self.inner.failure.clone(),
            self.inner.origin.clone(),
        )
    }

    /// Returns the kind of cancellation.
    #[must_use]
    pub fn kind(&self) -> CancelKind {
        self.inner.kind
    }

    /// Returns the human-readable message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.inner.message.as_deref()
    }

    /// Returns the body failure carried by a [`CancelKind::Failure`] reason.
    #[must_use]
    pub fn failure_error(&self) -> Option<&Error> {
        self.inner.failure.as_ref()
    }

    /// Returns the parent's reason for a [`CancelKind::ParentCancelled`] reason.
    #[must_use]
    pub fn origin(&self) -> Option<&Self> {
        self.inner.origin.as_ref()
    }

    /// Follows the parent chain up to the reason that started the cascade.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(origin) = current.origin() {
            current = origin;
        }
        current
    }

    /// Records a reason that arrived after this one had already won.
    pub fn add_secondary(&self, other: Self) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        self.inner.secondary.lock().push(other);
    }

    /// Returns a snapshot of the secondary reasons.
    #[must_use]
    pub fn secondary(&self) -> Vec<Self> {
        self.inner.secondary.lock().clone()
    }

    /// Returns true if both handles refer to the same reason.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Converts this reason into the error reported to waiters.
    #[must_use]
    pub fn to_error(&self) -> Error {
        match &self.inner.failure {
            Some(failure) => failure.clone(),
            None => Error::cancelled(self),
        }
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelReason")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("failure", &self.inner.failure)
            .field("origin", &self.inner.origin)
            .field("secondary", &self.inner.secondary.lock().len())
            .finish()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.kind)?;
        if let Some(msg) = &self.inner.message {
            write!(f, ": {msg}")?;
        }
        if let Some(failure) = &self.inner.failure {
            write!(f, ": {failure}")?;
        }
        if let Some(origin) = &self.inner.origin {
            write!(f, " ({origin})")?;
        }
        Ok(())
    }
}
