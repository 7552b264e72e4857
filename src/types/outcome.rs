//! Four-valued outcome type.
//!
//! [`Task::join_outcome`](crate::Task::join_outcome) never fails; it reports
//! what happened through an [`Outcome`]:
//!
//! - `Ok(T)`: the body returned a value
//! - `Err(E)`: the body returned an error
//! - `Cancelled(CancelReason)`: the wait was interrupted before the task finished
//! - `Panicked(PanicPayload)`: the body panicked

use super::cancel::CancelReason;
use crate::error::Error;
use core::fmt;

/// Payload from a caught panic.
///
/// This wraps the panic message for safe transport across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a payload from the value produced by `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The four-valued outcome of a concurrent operation.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
    /// Success with a value.
    Ok(T),
    /// Application-level error.
    Err(E),
    /// The operation was cancelled or its wait interrupted.
    Cancelled(CancelReason),
    /// The operation panicked.
    Panicked(PanicPayload),
}

impl<T, E> Outcome<T, E> {
    /// Returns true if this is a successful outcome.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this is an application error.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this represents a panic.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Maps the error value.
    pub fn map_err<F2, G: FnOnce(E) -> F2>(self, g: G) -> Outcome<T, F2> {
        match self {
            Self::Ok(v) => Outcome::Ok(v),
            Self::Err(e) => Outcome::Err(g(e)),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }
}

impl<T> Outcome<T, Error> {
    /// Collapses the outcome into a `Result`, turning cancellation and
    /// panics into their error kinds.
    #[allow(clippy::result_large_err)]
    pub fn into_result(self) -> crate::Result<T> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Cancelled(reason) if reason.kind() == super::CancelKind::Interrupted => {
                Err(Error::interrupted())
            }
            Self::Cancelled(reason) => Err(Error::cancelled(&reason)),
            Self::Panicked(payload) => Err(Error::panicked(&payload)),
        }
    }
}
