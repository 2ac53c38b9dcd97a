//! Scheduler role.
//!
//! Migrations and reference-data sync run before the health sentinel is
//! written; the sentinel exists before the beat process starts.

use crate::config::CELERY_APP;
use crate::error::StepError;
use crate::pipeline::{Pipeline, StepKind};
use crate::role::ContainerRole;

use super::RoleContext;

pub(super) fn pipeline(ctx: &RoleContext<'_>) -> Result<Pipeline, StepError> {
    let pipeline = Pipeline::new(ContainerRole::CeleryBeat)
        .step("clear-health-sentinel", StepKind::ClearSentinel(ctx.sentinel()));
    let pipeline = ctx.readiness(pipeline)?;

    let celery = &ctx.settings.celery;
    let beat = ctx
        .command(&celery.celery_bin)
        .arg(format!("--app={CELERY_APP}"))
        .arg("beat")
        .arg(format!("--loglevel={}", celery.log_level));

    Ok(pipeline
        .step("migrate", ctx.manage(["migrate", "--noinput"]))
        .step("compilemessages", ctx.manage(["compilemessages", "-v", "0"]))
        .step("sync-permissions-roles", ctx.manage(["sync_permissions_roles"]))
        .step("sync-valueset", ctx.manage(["sync_valueset"]))
        .step("mark-healthy", StepKind::MarkSentinel(ctx.sentinel()))
        .step("celery-beat", StepKind::Launch(beat)))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::Env;
    use crate::roles::tests::fixture;
    use crate::roles::{build, run, RunOutcome};
    use crate::runner::ScriptedRunner;

    #[test]
    fn test_step_order() {
        let (settings, urls) = fixture(&[]);
        let pipeline = build(ContainerRole::CeleryBeat, &settings, &urls).unwrap();
        assert_eq!(
            pipeline.step_names(),
            vec![
                "clear-health-sentinel",
                "wait-for-database",
                "wait-for-redis",
                "migrate",
                "compilemessages",
                "sync-permissions-roles",
                "sync-valueset",
                "mark-healthy",
                "celery-beat"
            ]
        );
    }

    #[test]
    fn test_beat_command_line() {
        let (settings, urls) = fixture(&[]);
        let plan = build(ContainerRole::CeleryBeat, &settings, &urls)
            .unwrap()
            .plan();
        assert_eq!(
            plan.last().unwrap().action,
            "exec celery --app=config.celery_app beat --loglevel=info"
        );
        assert_eq!(plan[3].action, "python manage.py migrate --noinput");
        assert_eq!(plan[4].action, "python manage.py compilemessages -v 0");
    }

    fn env_for(dir: &std::path::Path) -> Env {
        Env::from_pairs(vec![
            ("DATABASE_URL", "postgres://care:pw@db:5432/care".to_string()),
            ("REDIS_URL", "redis://cache:6379/0".to_string()),
            ("CARE_APP_DIR", dir.display().to_string()),
            ("CARE_ROLE_FILE", dir.join("container-role").display().to_string()),
            ("CARE_HEALTHY_FILE", dir.join("healthy").display().to_string()),
        ])
    }

    #[tokio::test]
    async fn test_sentinel_only_exists_for_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let healthy: PathBuf = dir.path().join("healthy");
        std::fs::write(&healthy, b"").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = ScriptedRunner::new().observe({
            let seen = Arc::clone(&seen);
            let healthy = healthy.clone();
            move |spec| {
                seen.lock()
                    .unwrap()
                    .push((spec.command_line(), healthy.exists()));
            }
        });

        let outcome = run(ContainerRole::CeleryBeat, &env_for(dir.path()), &runner, false)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let seen = seen.lock().unwrap().clone();
        let (last, rest) = seen.split_last().unwrap();
        assert!(last.0.starts_with("celery "));
        assert!(last.1, "sentinel missing when beat started");
        for (line, existed) in rest {
            assert!(!existed, "sentinel present during {line}");
        }
        assert_eq!(
            std::fs::read_to_string(dir.path().join("container-role")).unwrap(),
            "celery-beat"
        );
    }

    #[tokio::test]
    async fn test_failed_sync_never_marks_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail_on("sync_valueset", 1);

        let err = run(ContainerRole::CeleryBeat, &env_for(dir.path()), &runner, false)
            .await
            .unwrap_err();

        assert_eq!(err.reason_code(), "command_failed");
        assert!(!dir.path().join("healthy").exists());
        assert!(runner.invocations().iter().all(|i| !i.launched));
    }
}
