//! Command runner interface and implementations.
//!
//! The runner abstracts external process execution:
//! - One-shot management commands run to completion
//! - The long-lived service is launched and supervised until it exits
//!
//! A scripted implementation is provided for testing.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::StepError;
use crate::process;

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the inherited environment. Never serialized.
    #[serde(skip)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build from an argv list; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self, StepError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StepError::EmptyCommand("argv is empty".to_string()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program and arguments joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// External process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and return its exit code.
    async fn run(&self, spec: &CommandSpec) -> Result<i32, StepError>;

    /// Launch the long-lived service and supervise it until it exits.
    async fn launch(&self, spec: &CommandSpec) -> Result<i32, StepError>;
}

/// Runs real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<i32, StepError> {
        process::run(spec).await
    }

    async fn launch(&self, spec: &CommandSpec) -> Result<i32, StepError> {
        process::supervise(spec).await
    }
}

/// A recorded call on [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command_line: String,
    pub launched: bool,
    pub env: BTreeMap<String, String>,
}

type Observer = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// Runner for tests: records every call and fails on chosen tokens.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    failures: HashMap<String, i32>,
    observer: Option<Observer>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` whenever the program or an argument equals `token`.
    pub fn fail_on(mut self, token: impl Into<String>, exit_code: i32) -> Self {
        self.failures.insert(token.into(), exit_code);
        self
    }

    /// Call `observer` at the start of every invocation.
    pub fn observe(mut self, observer: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|i| i.command_line)
            .collect()
    }

    fn record(&self, spec: &CommandSpec, launched: bool) -> i32 {
        if let Some(observer) = &self.observer {
            observer(spec);
        }

        info!(command = %spec.command_line(), launched, "[SCRIPTED] running command");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                command_line: spec.command_line(),
                launched,
                env: spec.env.clone(),
            });

        std::iter::once(&spec.program)
            .chain(spec.args.iter())
            .find_map(|token| self.failures.get(token).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<i32, StepError> {
        Ok(self.record(spec, false))
    }

    async fn launch(&self, spec: &CommandSpec) -> Result<i32, StepError> {
        Ok(self.record(spec, true))
    }
}
