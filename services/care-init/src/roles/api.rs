//! API role: static assets, translations, then gunicorn.

use crate::config::{API_BIND, API_WORKERS, WSGI_APP};
use crate::error::StepError;
use crate::pipeline::{Pipeline, StepKind};
use crate::role::ContainerRole;
use crate::runner::CommandSpec;

use super::RoleContext;

pub(super) fn pipeline(ctx: &RoleContext<'_>) -> Result<Pipeline, StepError> {
    let pipeline = ctx.readiness(Pipeline::new(ContainerRole::Api))?;

    Ok(pipeline
        .step("collectstatic", ctx.manage(["collectstatic", "--noinput"]))
        .step("compilemessages", ctx.manage(["compilemessages", "-v", "0"]))
        .step("gunicorn", StepKind::Launch(server_command(ctx))))
}

fn server_command(ctx: &RoleContext<'_>) -> CommandSpec {
    let server = &ctx.settings.server;
    let gunicorn_args = [
        WSGI_APP.to_string(),
        "--bind".to_string(),
        API_BIND.to_string(),
        format!("--chdir={}", ctx.settings.app_dir.display()),
        "--workers".to_string(),
        API_WORKERS.to_string(),
        "--access-logfile".to_string(),
        server.access_logfile.clone(),
        "--error-logfile".to_string(),
        server.error_logfile.clone(),
        "--access-logformat".to_string(),
        server.access_log_format.clone(),
    ];

    if server.newrelic_config.is_file() {
        ctx.command(&server.newrelic_admin_bin)
            .arg("run-program")
            .arg(server.gunicorn_bin.clone())
            .args(gunicorn_args)
            .env(
                "NEW_RELIC_CONFIG_FILE",
                server.newrelic_config.display().to_string(),
            )
    } else {
        ctx.command(&server.gunicorn_bin).args(gunicorn_args)
    }
}
