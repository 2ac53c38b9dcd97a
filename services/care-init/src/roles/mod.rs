//! Role startup sequences.
//!
//! Each role builds a [`Pipeline`] from the loaded settings and resolved
//! connection URLs. [`run`] wires the pieces together in the order every role
//! shares: role file, URL resolution, pipeline.

mod api;
mod beat;
mod worker;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{redact_url, ConnectionUrls, Env, ReadinessMode, Settings};
use crate::error::{EntrypointError, StepError};
use crate::pipeline::{Pipeline, PipelineReport, StepKind, StepPlan};
use crate::readiness::{Dependency, ProbePolicy};
use crate::role::{self, ContainerRole};
use crate::runner::{CommandRunner, CommandSpec};
use crate::sentinel::Sentinel;

/// Result of [`run`].
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Dry run: nothing executed.
    Planned {
        role: ContainerRole,
        steps: Vec<StepPlan>,
    },
    /// Pipeline ran to the end.
    Completed(PipelineReport),
}

/// Start a container role.
///
/// The role file is written before anything else, including URL resolution,
/// unless `dry_run` is set, in which case nothing on disk is touched.
pub async fn run(
    role: ContainerRole,
    env: &Env,
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> Result<RunOutcome, EntrypointError> {
    let settings = Settings::from_env(env);

    if !dry_run {
        record_role(&settings, role)?;
    }

    let urls = ConnectionUrls::resolve(env, settings.redis_tls_verify)?;
    info!(
        role = %role,
        database_url = %redact_url(&urls.database.url),
        database_source = ?urls.database.source,
        redis_url = %redact_url(&urls.redis.url),
        redis_source = ?urls.redis.source,
        "connection urls resolved"
    );

    let pipeline = build(role, &settings, &urls).map_err(EntrypointError::Plan)?;

    if dry_run {
        return Ok(RunOutcome::Planned {
            role,
            steps: pipeline.plan(),
        });
    }

    pipeline.run(runner).await.map(RunOutcome::Completed)
}

/// Write the role file. Rewriting it with the same role is harmless.
pub fn record_role(settings: &Settings, role: ContainerRole) -> Result<(), EntrypointError> {
    role::write_role_file(&settings.role_file, role).map_err(|source| EntrypointError::RoleFile {
        path: settings.role_file.display().to_string(),
        source,
    })
}

/// Build the startup pipeline for a role.
pub fn build(
    role: ContainerRole,
    settings: &Settings,
    urls: &ConnectionUrls,
) -> Result<Pipeline, StepError> {
    let ctx = RoleContext { settings, urls };
    match role {
        ContainerRole::Api => api::pipeline(&ctx),
        ContainerRole::CeleryBeat => beat::pipeline(&ctx),
        ContainerRole::CeleryWorker => worker::pipeline(&ctx),
    }
}

/// Shared builders for role pipelines.
struct RoleContext<'a> {
    settings: &'a Settings,
    urls: &'a ConnectionUrls,
}

impl RoleContext<'_> {
    /// A command run from the app directory with the resolved URLs exported.
    fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program)
            .cwd(&self.settings.app_dir)
            .envs(&self.urls.exports())
    }

    /// `python manage.py <args>`.
    fn manage<'s>(&self, args: impl IntoIterator<Item = &'s str>) -> StepKind {
        StepKind::Run(self.command(&self.settings.python).arg("manage.py").args(args))
    }

    fn sentinel(&self) -> Sentinel {
        Sentinel::new(&self.settings.healthy_file)
    }

    /// Append the database then cache readiness gate.
    fn readiness(&self, mut pipeline: Pipeline) -> Result<Pipeline, StepError> {
        let readiness = &self.settings.readiness;
        let gates = [
            (Dependency::Database, &readiness.wait_for_db, &self.urls.database.url),
            (Dependency::Redis, &readiness.wait_for_redis, &self.urls.redis.url),
        ];

        for (dependency, argv, url) in gates {
            let name = format!("wait-for-{dependency}");
            pipeline = match readiness.mode {
                ReadinessMode::Command => {
                    let spec = CommandSpec::from_argv(argv)?
                        .cwd(&self.settings.app_dir)
                        .envs(&self.urls.exports());
                    pipeline.step(name, StepKind::Run(spec))
                }
                ReadinessMode::Tcp => pipeline.step(
                    name,
                    StepKind::Probe {
                        dependency,
                        url: url.clone(),
                        policy: ProbePolicy::from(readiness),
                    },
                ),
                ReadinessMode::Skip => {
                    warn!(dependency = %dependency, "readiness gate skipped");
                    pipeline
                }
            };
        }

        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Env;

    pub(super) fn fixture(extra: &[(&str, &str)]) -> (Settings, ConnectionUrls) {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://care:pw@db:5432/care"),
            ("REDIS_URL", "redis://cache:6379/0"),
            ("CARE_APP_DIR", "/srv/care"),
        ];
        pairs.extend_from_slice(extra);
        let env = Env::from_pairs(pairs);
        let settings = Settings::from_env(&env);
        let urls = ConnectionUrls::resolve(&env, false).unwrap();
        (settings, urls)
    }

    #[test]
    fn test_tcp_mode_uses_probes() {
        let (settings, urls) = fixture(&[("CARE_READINESS_MODE", "tcp")]);
        let pipeline = build(ContainerRole::Api, &settings, &urls).unwrap();
        let plan = pipeline.plan();
        assert_eq!(plan[0].action, "probe tcp db:5432");
        assert_eq!(plan[1].action, "probe tcp cache:6379");
    }

    #[test]
    fn test_skip_mode_has_no_wait_steps() {
        let (settings, urls) = fixture(&[("CARE_READINESS_MODE", "skip")]);
        let pipeline = build(ContainerRole::CeleryWorker, &settings, &urls).unwrap();
        assert!(!pipeline.step_names().iter().any(|n| n.starts_with("wait-for")));
    }

    #[test]
    fn test_commands_get_urls_and_app_dir() {
        let (settings, urls) = fixture(&[]);
        let pipeline = build(ContainerRole::Api, &settings, &urls).unwrap();
        for step in pipeline.steps() {
            if let StepKind::Run(spec) | StepKind::Launch(spec) = &step.kind {
                assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/srv/care")));
                assert_eq!(
                    spec.env.get("DATABASE_URL").map(String::as_str),
                    Some("postgres://care:pw@db:5432/care")
                );
                assert_eq!(
                    spec.env.get("REDIS_URL").map(String::as_str),
                    Some("redis://cache:6379/0")
                );
            }
        }
    }
}
