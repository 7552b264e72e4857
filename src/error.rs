//! Error types and error handling strategy for schism.
//!
//! Error handling follows these principles:
//!
//! - Failures raised by task bodies, scope bodies and actor work items are
//!   captured and delivered to whoever waits for them, never lost on the
//!   worker thread
//! - Panics inside bodies are isolated and converted to [`ErrorKind::Panicked`]
//! - Interruption of a blocked thread is a regular error ([`ErrorKind::Interrupted`])
//! - Protocol misuse (joining from a foreign thread, unbalanced releases)
//!   is a programmer bug and panics instead of returning an error
//!
//! # Error Categories
//!
//! - **Cancellation**: cancelled scopes and interrupted waits
//! - **Task**: failed or panicked bodies
//! - **Lifecycle**: closed actors and ended lifetimes
//! - **Runtime**: thread spawning, configuration and internal errors
//! - **User**: application-provided failures
//!
//! When several failures race to become the cause of one exit, the first one
//! wins and the rest are attached as [suppressed](Error::suppressed) errors.

use core::fmt;
use std::sync::Arc;

use crate::types::{CancelReason, PanicPayload};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The surrounding scope was cancelled.
    Cancelled,
    /// A blocking wait was interrupted through its [`Cx`](crate::Cx).
    Interrupted,

    // === Task ===
    /// A task body failed. Returned by the task's own join, or by the group
    /// exit for failures nobody joined.
    TaskFailed,
    /// A body panicked; the panic was caught on its worker thread.
    Panicked,

    // === Lifecycle ===
    /// The actor's worker has terminated.
    ActorClosed,
    /// The shared lifetime has ended; no new retains are accepted.
    LifetimeEnded,

    // === Runtime ===
    /// The operating system refused to start a worker thread.
    SpawnFailed,
    /// Invalid runtime configuration.
    Config,
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::Interrupted => ErrorCategory::Cancellation,
            Self::TaskFailed | Self::Panicked => ErrorCategory::Task,
            Self::ActorClosed | Self::LifetimeEnded => ErrorCategory::Lifecycle,
            Self::SpawnFailed | Self::Config | Self::Internal => ErrorCategory::Runtime,
            Self::User => ErrorCategory::User,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation and interruption.
    Cancellation,
    /// Task body failures.
    Task,
    /// Closed actors and ended lifetimes.
    Lifecycle,
    /// Thread spawning, configuration and internal errors.
    Runtime,
    /// User-originated errors.
    User,
}

/// The main error type for schism operations.
///
/// Cloning is cheap enough to hand the same failure to every party that
/// observes it (repeated joins, queued actor calls, suppressed lists).
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    suppressed: Vec<Error>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            suppressed: Vec::new(),
        }
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Wraps an arbitrary application error as a user error.
    #[must_use]
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates the error returned by an interrupted wait.
    #[must_use]
    pub const fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(reason.to_string())
    }

    /// Creates an error describing a caught panic.
    #[must_use]
    pub fn panicked(payload: &PanicPayload) -> Self {
        Self::new(ErrorKind::Panicked).with_message(payload.message())
    }

    /// Wraps the first unobserved task failure of a group.
    #[must_use]
    pub fn task_failed(cause: Self) -> Self {
        Self::new(ErrorKind::TaskFailed)
            .with_message(cause.to_string())
            .with_source(cause)
    }

    /// Creates the error delivered to work submitted to a closed actor.
    #[must_use]
    pub fn actor_closed(cause: &Self) -> Self {
        Self::new(ErrorKind::ActorClosed)
            .with_message(cause.to_string())
            .with_source(cause.clone())
    }

    /// Creates the error returned by a retain on an ended lifetime.
    #[must_use]
    pub fn lifetime_ended() -> Self {
        Self::new(ErrorKind::LifetimeEnded).with_message("lifetime has ended")
    }

    /// Creates a spawn failure from the underlying I/O error.
    #[must_use]
    pub fn spawn_failed(err: std::io::Error) -> Self {
        Self::new(ErrorKind::SpawnFailed)
            .with_message(format!("failed to spawn worker thread: {err}"))
            .with_source(err)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents scope cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is an interrupted wait.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Returns true if this error describes a caught panic.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self.kind, ErrorKind::Panicked)
    }

    /// Returns true if this error reports a closed actor.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ActorClosed)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches a secondary failure that lost the race to become the cause.
    #[must_use]
    pub fn with_suppressed(mut self, other: Self) -> Self {
        self.add_suppressed(other);
        self
    }

    /// Attaches a secondary failure in place.
    pub fn add_suppressed(&mut self, other: Self) {
        self.suppressed.push(other);
    }

    /// Returns the secondary failures attached to this error.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        &self.suppressed
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<crate::runtime::ConfigError> for Error {
    fn from(e: crate::runtime::ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for schism operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
