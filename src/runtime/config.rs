//! Runtime configuration types.
//!
//! There is no global runtime object. A [`RuntimeConfig`] is attached to the
//! root [`Cx`](crate::Cx) built by [`CxBuilder`](super::builder::CxBuilder)
//! and inherited by every worker context spawned below it.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"schism-worker"` |
//! | `on_thread_start` | `None` |
//! | `on_thread_stop` | `None` |

use std::fmt;
use std::sync::Arc;

/// Default stack size for worker threads.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Smallest stack size accepted by [`RuntimeConfig::normalize`].
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "schism-worker";

/// Callback invoked on worker threads at start or stop.
pub type ThreadCallback = Arc<dyn Fn() + Send + Sync>;

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Stack size per worker thread.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<ThreadCallback>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<ThreadCallback>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        } else if self.thread_stack_size < MIN_STACK_SIZE {
            self.thread_stack_size = MIN_STACK_SIZE;
        }
        if self.thread_name_prefix.trim().is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Builds the name for a worker thread.
    pub(crate) fn thread_name(&self, role: &str, id: impl fmt::Display) -> String {
        format!("{}-{role}-{id}", self.thread_name_prefix)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}
