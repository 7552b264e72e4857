//! Environment variable support for [`CxBuilder`](super::builder::CxBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods
//! 2. **Environment variables**: values from `SCHISM_*` env vars
//! 3. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `SCHISM_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `SCHISM_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::runtime::config::RuntimeConfig;

/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "SCHISM_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "SCHISM_THREAD_NAME_PREFIX";

/// Error raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
        /// Description of the accepted format.
        expected: &'static str,
    },
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, read_env)
}

/// Same as [`apply_env_overrides`] with an explicit variable lookup.
pub fn apply_overrides_from<F>(config: &mut RuntimeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: val.to_string(),
            expected: "unsigned integer",
        })
}
