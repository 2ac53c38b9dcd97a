//! care-init - container entrypoint for Care.
//!
//! One subcommand per container role (`api`, `celery-beat`,
//! `celery-worker`), plus `healthcheck` for the orchestrator's probe and
//! `resolve-urls` for debugging connection settings.

use std::error::Error as _;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use care_init::config::redact_url;
use care_init::logging::{self, LogFormat};
use care_init::{
    healthcheck, roles, ConnectionUrls, ContainerRole, Env, EntrypointError, RunOutcome,
    Settings, SystemRunner, VERSION,
};

/// Container entrypoint for the Care platform.
#[derive(Debug, Parser)]
#[command(name = "care-init")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Stderr log format.
    #[arg(long, global = true, value_enum, default_value = "json", env = "CARE_INIT_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prepare and run the gunicorn application server.
    Api(RoleArgs),

    /// Migrate, sync reference data and run the celery beat scheduler.
    CeleryBeat(RoleArgs),

    /// Prepare and run a celery task worker.
    CeleryWorker(RoleArgs),

    /// Probe this container according to its recorded role.
    Healthcheck,

    /// Print the resolved DATABASE_URL and REDIS_URL.
    ResolveUrls {
        #[arg(long, value_enum, default_value = "env")]
        format: UrlFormat,

        /// Print credentials instead of masking them.
        #[arg(long)]
        show_secrets: bool,
    },
}

impl Commands {
    /// Role to write to the role file, if this command starts one for real.
    fn role_to_record(&self) -> Option<ContainerRole> {
        match self {
            Commands::Api(args) if !args.dry_run => Some(ContainerRole::Api),
            Commands::CeleryBeat(args) if !args.dry_run => Some(ContainerRole::CeleryBeat),
            Commands::CeleryWorker(args) if !args.dry_run => Some(ContainerRole::CeleryWorker),
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
struct RoleArgs {
    /// Print the startup plan as JSON without running anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UrlFormat {
    Env,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = Env::from_process();
    let settings = Settings::from_env(&env);

    // The role file goes first, even before logging can fail.
    if let Some(role) = cli.command.role_to_record() {
        if let Err(e) = roles::record_role(&settings, role) {
            eprintln!("Failed to record container role: {}", e);
            return ExitCode::from(1);
        }
    }

    if let Err(e) = logging::init(cli.log_format, settings.init_log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    match cli.command {
        Commands::Api(args) => start(ContainerRole::Api, &env, args).await,
        Commands::CeleryBeat(args) => start(ContainerRole::CeleryBeat, &env, args).await,
        Commands::CeleryWorker(args) => start(ContainerRole::CeleryWorker, &env, args).await,
        Commands::Healthcheck => ExitCode::from(healthcheck::check(&settings).await.exit_code()),
        Commands::ResolveUrls {
            format,
            show_secrets,
        } => resolve_urls(&env, &settings, format, show_secrets),
    }
}

async fn start(role: ContainerRole, env: &Env, args: RoleArgs) -> ExitCode {
    info!(version = VERSION, role = %role, dry_run = args.dry_run, "care-init starting");

    match roles::run(role, env, &SystemRunner, args.dry_run).await {
        Ok(plan @ RunOutcome::Planned { .. }) => match serde_json::to_string_pretty(&plan) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "failed to serialize plan");
                ExitCode::from(1)
            }
        },
        Ok(RunOutcome::Completed(report)) => {
            let exit_code = report.exit_code.unwrap_or(0);
            info!(role = %role, exit_code, steps = report.steps.len(), "care-init exiting");
            ExitCode::from(u8::try_from(exit_code).unwrap_or(1))
        }
        Err(e) => {
            report_failure(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn report_failure(e: &EntrypointError) {
    error!(reason = e.reason_code(), error = %e, "care-init failed");
    let mut source = e.source();
    while let Some(cause) = source {
        error!(cause = %cause, "caused by");
        source = cause.source();
    }
}

fn resolve_urls(env: &Env, settings: &Settings, format: UrlFormat, show_secrets: bool) -> ExitCode {
    let mut urls = match ConnectionUrls::resolve(env, settings.redis_tls_verify) {
        Ok(urls) => urls,
        Err(e) => {
            report_failure(&EntrypointError::from(e));
            return ExitCode::from(1);
        }
    };

    if !show_secrets {
        urls.database.url = redact_url(&urls.database.url);
        urls.redis.url = redact_url(&urls.redis.url);
    }

    match format {
        UrlFormat::Env => {
            for (key, value) in urls.exports() {
                println!("{key}={value}");
            }
        }
        UrlFormat::Json => match serde_json::to_string_pretty(&urls) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(error = %e, "failed to serialize urls");
                return ExitCode::from(1);
            }
        },
    }

    ExitCode::SUCCESS
}
