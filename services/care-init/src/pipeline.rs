//! Ordered startup pipeline.
//!
//! A role's startup is a list of fallible steps run strictly in order. The
//! first failure stops the run and is reported with the step's name and
//! position; the last step launches the service, whose exit code ends the run.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::redact_url;
use crate::error::{EntrypointError, StepError};
use crate::readiness::{self, Dependency, Endpoint, ProbePolicy};
use crate::role::ContainerRole;
use crate::runner::{CommandRunner, CommandSpec};
use crate::sentinel::Sentinel;

/// What a step does.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Remove a stale health sentinel.
    ClearSentinel(Sentinel),
    /// Built-in TCP readiness probe against a connection URL.
    Probe {
        dependency: Dependency,
        url: String,
        policy: ProbePolicy,
    },
    /// Run a command to completion; non-zero exit fails the step.
    Run(CommandSpec),
    /// Create the health sentinel.
    MarkSentinel(Sentinel),
    /// Launch and supervise the service.
    Launch(CommandSpec),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Human-readable action, free of secrets.
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::ClearSentinel(s) => format!("remove {}", s.path().display()),
            StepKind::Probe { dependency, url, .. } => {
                match Endpoint::from_url(url, dependency.default_port()) {
                    Ok(endpoint) => format!("probe tcp {endpoint}"),
                    Err(_) => format!("probe tcp {}", redact_url(url)),
                }
            }
            StepKind::Run(spec) => spec.command_line(),
            StepKind::MarkSentinel(s) => format!("create {}", s.path().display()),
            StepKind::Launch(spec) => format!("exec {}", spec.command_line()),
        }
    }

    async fn execute(&self, runner: &dyn CommandRunner) -> Result<Option<i32>, StepError> {
        match &self.kind {
            StepKind::ClearSentinel(sentinel) => sentinel.clear().map(|_| None),
            StepKind::Probe {
                dependency,
                url,
                policy,
            } => {
                let endpoint = Endpoint::from_url(url, dependency.default_port())?;
                readiness::wait_for_tcp(*dependency, &endpoint, *policy).await?;
                Ok(None)
            }
            StepKind::Run(spec) => match runner.run(spec).await? {
                0 => Ok(None),
                exit_code => Err(StepError::CommandFailed {
                    program: spec.program.clone(),
                    exit_code,
                }),
            },
            StepKind::MarkSentinel(sentinel) => sentinel.mark().map(|_| None),
            StepKind::Launch(spec) => runner.launch(spec).await.map(Some),
        }
    }
}

/// One line of a dry-run plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepPlan {
    pub index: usize,
    pub name: String,
    pub action: String,
}

/// Timing of a completed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Outcome of a pipeline that reached its end.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub role: ContainerRole,
    pub steps: Vec<StepRecord>,
    /// Exit code of the launched service, if the pipeline launches one.
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    role: ContainerRole,
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(role: ContainerRole) -> Self {
        Self {
            role,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, name: impl Into<String>, kind: StepKind) -> Self {
        self.steps.push(Step::new(name, kind));
        self
    }

    pub fn role(&self) -> ContainerRole {
        self.role
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn plan(&self) -> Vec<StepPlan> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepPlan {
                index,
                name: step.name.clone(),
                action: step.describe(),
            })
            .collect()
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<PipelineReport, EntrypointError> {
        let mut records = Vec::with_capacity(self.steps.len());
        let mut exit_code = None;

        for (index, step) in self.steps.iter().enumerate() {
            let started_at = Utc::now();
            let clock = Instant::now();
            info!(role = %self.role, step = %step.name, index, action = %step.describe(), "step starting");

            match step.execute(runner).await {
                Ok(code) => {
                    let elapsed_ms = clock.elapsed().as_millis() as u64;
                    info!(role = %self.role, step = %step.name, elapsed_ms, "step finished");
                    records.push(StepRecord {
                        name: step.name.clone(),
                        started_at,
                        elapsed_ms,
                    });
                    if code.is_some() {
                        exit_code = code;
                    }
                }
                Err(source) => {
                    error!(
                        role = %self.role,
                        step = %step.name,
                        index,
                        reason = source.reason_code(),
                        error = %source,
                        "step failed, aborting startup"
                    );
                    return Err(EntrypointError::Step {
                        role: self.role,
                        step: step.name.clone(),
                        index,
                        source,
                    });
                }
            }
        }

        if exit_code.is_none() {
            warn!(role = %self.role, "pipeline finished without launching a service");
        }

        Ok(PipelineReport {
            role: self.role,
            steps: records,
            exit_code,
        })
    }
}
