//! Task worker role.

use crate::config::CELERY_APP;
use crate::error::StepError;
use crate::pipeline::{Pipeline, StepKind};
use crate::role::ContainerRole;

use super::RoleContext;

pub(super) fn pipeline(ctx: &RoleContext<'_>) -> Result<Pipeline, StepError> {
    let pipeline = Pipeline::new(ContainerRole::CeleryWorker)
        .step("clear-health-sentinel", StepKind::ClearSentinel(ctx.sentinel()));
    let pipeline = ctx.readiness(pipeline)?;

    let celery = &ctx.settings.celery;
    let worker = ctx
        .command(&celery.celery_bin)
        .arg(format!("--app={CELERY_APP}"))
        .arg("worker")
        .arg(format!("--max-tasks-per-child={}", celery.max_tasks_per_child))
        .arg(format!("--loglevel={}", celery.log_level));

    Ok(pipeline
        .step("compilemessages", ctx.manage(["compilemessages", "-v", "0"]))
        .step("mark-healthy", StepKind::MarkSentinel(ctx.sentinel()))
        .step("celery-worker", StepKind::Launch(worker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::build;
    use crate::roles::tests::fixture;

    #[test]
    fn test_worker_plan() {
        let (settings, urls) = fixture(&[("CARE_CELERY_MAX_TASKS_PER_CHILD", "10")]);
        let pipeline = build(ContainerRole::CeleryWorker, &settings, &urls).unwrap();

        assert_eq!(
            pipeline.step_names(),
            vec![
                "clear-health-sentinel",
                "wait-for-database",
                "wait-for-redis",
                "compilemessages",
                "mark-healthy",
                "celery-worker"
            ]
        );
        assert_eq!(
            pipeline.plan().last().unwrap().action,
            "exec celery --app=config.celery_app worker --max-tasks-per-child=10 --loglevel=info"
        );
    }
}
