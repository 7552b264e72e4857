//! Builder for root contexts.

use std::sync::Arc;

use crate::cx::Cx;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config::{apply_overrides_from, ConfigError};
use crate::tracing_compat::debug;

/// Builder for a root [`Cx`] with custom configuration.
///
/// Values set through builder methods take precedence over environment
/// overrides regardless of call order.
#[derive(Clone, Default)]
pub struct CxBuilder {
    config: RuntimeConfig,
    explicit_stack_size: bool,
    explicit_name_prefix: bool,
}

impl CxBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self.explicit_stack_size = true;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self.explicit_name_prefix = true;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Apply `SCHISM_*` environment variables to fields not set explicitly.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an
    /// explicit variable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overridden = self.config.clone();
        apply_overrides_from(&mut overridden, lookup)?;
        if !self.explicit_stack_size {
            self.config.thread_stack_size = overridden.thread_stack_size;
        }
        if !self.explicit_name_prefix {
            self.config.thread_name_prefix = overridden.thread_name_prefix;
        }
        Ok(self)
    }

    /// Returns the configuration as it would be built.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build the root context and bind it to the calling thread.
    #[must_use]
    pub fn build(self) -> Cx {
        let mut config = self.config;
        config.normalize();
        debug!(
            thread_name_prefix = %config.thread_name_prefix,
            thread_stack_size = config.thread_stack_size,
            "root context created"
        );
        let cx = Cx::with_config(Arc::new(config));
        cx.bind_current();
        cx
    }
}
