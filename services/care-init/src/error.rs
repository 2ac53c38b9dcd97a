//! Error types for the entrypoint.

use thiserror::Error;

use crate::role::ContainerRole;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A component variable needed to compose a URL is unset.
    #[error("missing_env_var: {0} is not set")]
    MissingVar(&'static str),
}

/// Failure of a single pipeline step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Command could not be started at all.
    #[error("spawn_failed: {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Command ran and exited non-zero.
    #[error("command_failed: {program} exited with code {exit_code}")]
    CommandFailed { program: String, exit_code: i32 },

    /// Command line was empty.
    #[error("empty_command: {0}")]
    EmptyCommand(String),

    /// Built-in readiness probe gave up.
    #[error("dependency_unavailable: {dependency} at {target} after {attempts} attempts")]
    DependencyUnavailable {
        dependency: String,
        target: String,
        attempts: u32,
    },

    /// Resolved URL has no usable host.
    #[error("invalid_url: {0}")]
    InvalidUrl(String),

    /// Sentinel file could not be written or removed.
    #[error("sentinel_failed: {path}: {source}")]
    Sentinel {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            StepError::SpawnFailed { .. } => "spawn_failed",
            StepError::CommandFailed { .. } => "command_failed",
            StepError::EmptyCommand(_) => "empty_command",
            StepError::DependencyUnavailable { .. } => "dependency_unavailable",
            StepError::InvalidUrl(_) => "invalid_url",
            StepError::Sentinel { .. } => "sentinel_failed",
        }
    }
}

/// Top-level entrypoint failure.
#[derive(Debug, Error)]
pub enum EntrypointError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Writing the role file failed.
    #[error("role_file_failed: {path}: {source}")]
    RoleFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline could not be built from the settings.
    #[error("plan_invalid: {0}")]
    Plan(#[source] StepError),

    /// A pipeline step failed; later steps never ran.
    #[error("{role} step {index} ({step}) failed: {source}")]
    Step {
        role: ContainerRole,
        step: String,
        index: usize,
        #[source]
        source: StepError,
    },
}

impl EntrypointError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EntrypointError::Config(_) => "config_invalid",
            EntrypointError::RoleFile { .. } => "role_file_failed",
            EntrypointError::Plan(_) => "plan_invalid",
            EntrypointError::Step { source, .. } => source.reason_code(),
        }
    }

    /// Process exit code for this failure.
    ///
    /// A failed command's own status is passed through, like `set -e` would.
    /// A command that cannot be started exits 127 (not found) or 126 (not
    /// executable), as a shell reports it.
    pub fn exit_code(&self) -> u8 {
        match self {
            EntrypointError::Step {
                source: StepError::CommandFailed { exit_code, .. },
                ..
            } if (1..=255).contains(exit_code) => *exit_code as u8,
            EntrypointError::Step {
                source: StepError::SpawnFailed { source, .. },
                ..
            } => match source.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => 1,
            },
            _ => 1,
        }
    }
}
