//! Tracing compatibility layer for structured logging.
//!
//! Works whether or not the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled** (default): re-exports from the `tracing` crate.
//! - **Without feature**: no-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use schism::tracing_compat::{debug, trace};
//!
//! trace!(scope_id = %id, "scope completed");
//! debug!(cause = %reason, "scope cancelled");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, debug_span, error, info, trace, trace_span, warn, Level, Span};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    /// No-op trace_span macro.
    #[macro_export]
    macro_rules! trace_span {
        ($($arg:tt)*) => {
            $crate::tracing_compat::NoopSpan
        };
    }

    /// No-op debug_span macro.
    #[macro_export]
    macro_rules! debug_span {
        ($($arg:tt)*) => {
            $crate::tracing_compat::NoopSpan
        };
    }

    pub use crate::{debug, debug_span, error, info, trace, trace_span, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// A no-op span returned by the span macros when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy)]
pub struct NoopSpan;

#[cfg(not(feature = "tracing-integration"))]
impl NoopSpan {
    /// No-op enter; returns a guard that does nothing.
    #[must_use]
    pub const fn enter(&self) -> NoopGuard {
        NoopGuard
    }

    /// Returns a disabled span.
    #[must_use]
    pub const fn none() -> Self {
        Self
    }
}

/// Guard returned by [`NoopSpan::enter`].
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug)]
pub struct NoopGuard;

/// Tracing level stand-in when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level.
    TRACE,
    /// Debug level.
    DEBUG,
    /// Info level.
    INFO,
    /// Warn level.
    WARN,
    /// Error level.
    ERROR,
}
