//! Runtime configuration and worker threads.
//!
//! schism has no scheduler. The runtime layer is only:
//!
//! - [`config`]: [`RuntimeConfig`] shared by every context of one tree
//! - [`env_config`]: `SCHISM_*` environment overrides
//! - [`builder`]: [`CxBuilder`] producing the root [`Cx`](crate::Cx)
//! - `worker`: one dedicated OS thread per task, launched scope or actor

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod worker;

pub use builder::CxBuilder;
pub use config::RuntimeConfig;
pub use env_config::{apply_env_overrides, ConfigError};
