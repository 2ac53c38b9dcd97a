//! Care container entrypoint.
//!
//! Replaces the per-role shell entrypoints of the Care image:
//! - Connection URL resolution from discrete `POSTGRES_*` / `REDIS_*` parts
//! - Readiness gating on the database and cache
//! - Ordered, fail-fast management commands per role
//! - Health sentinel and role file for the orchestrator
//! - Supervision of the long-lived gunicorn or celery process

pub mod config;
pub mod error;
pub mod healthcheck;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod readiness;
pub mod role;
pub mod roles;
pub mod runner;
pub mod sentinel;

pub use config::{ConnectionUrls, Env, Settings};
pub use error::{ConfigError, EntrypointError, StepError};
pub use pipeline::{Pipeline, PipelineReport};
pub use role::ContainerRole;
pub use roles::RunOutcome;
pub use runner::{CommandRunner, CommandSpec, ScriptedRunner, SystemRunner};

/// Entrypoint version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
