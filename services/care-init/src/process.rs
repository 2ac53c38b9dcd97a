//! Child process spawning and supervision.
//!
//! Every command inherits stdio so its diagnostics reach the container log
//! unchanged. While a child runs we:
//! - Forward SIGTERM, SIGINT, SIGHUP and SIGQUIT to it
//! - Reap zombies once it exits (we may be PID 1)
//! - Map signal deaths to `128 + signo`

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::error::StepError;
use crate::runner::CommandSpec;

/// Run a command to completion.
pub async fn run(spec: &CommandSpec) -> Result<i32, StepError> {
    let mut child = spawn(spec)?;
    debug!(pid = ?child.id(), command = %spec.command_line(), "command started");

    let status = wait_with_signals(&mut child)
        .await
        .map_err(|source| spawn_error(spec, source))?;
    Ok(exit_code(status))
}

/// Launch the long-lived service and wait for it to exit.
pub async fn supervise(spec: &CommandSpec) -> Result<i32, StepError> {
    let mut child = spawn(spec)?;
    info!(pid = ?child.id(), program = %spec.program, "service started");

    let status = wait_with_signals(&mut child)
        .await
        .map_err(|source| spawn_error(spec, source))?;
    let code = exit_code(status);

    info!(exit_code = code, "service exited");

    reap_zombies();

    Ok(code)
}

fn spawn(spec: &CommandSpec) -> Result<Child, StepError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    cmd.spawn().map_err(|source| spawn_error(spec, source))
}

fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> StepError {
    StepError::SpawnFailed {
        program: spec.program.clone(),
        source,
    }
}

/// Exit code, or `128 + signo` for a signal death.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(128)
}

/// Wait for child exit while forwarding signals.
async fn wait_with_signals(child: &mut Child) -> std::io::Result<ExitStatus> {
    let Some(raw_pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };
    let pid = Pid::from_raw(raw_pid as i32);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;

    loop {
        tokio::select! {
            status = child.wait() => {
                return status;
            }
            _ = sigterm.recv() => forward(pid, Signal::SIGTERM),
            _ = sigint.recv() => forward(pid, Signal::SIGINT),
            _ = sighup.recv() => forward(pid, Signal::SIGHUP),
            _ = sigquit.recv() => forward(pid, Signal::SIGQUIT),
        }
    }
}

fn forward(pid: Pid, sig: Signal) {
    info!(pid = pid.as_raw(), signal = ?sig, "forwarding signal to child");
    if let Err(e) = kill(pid, sig) {
        warn!(pid = pid.as_raw(), signal = ?sig, error = %e, "failed to forward signal");
    }
}

/// Reap any zombie child processes.
///
/// Waits on every child of this process, not only ours. Covered by
/// `tests/supervise.rs`, which runs alone in its own test binary.
fn reap_zombies() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                debug!(pid = pid.as_raw(), code = code, "reaped zombie");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                debug!(pid = pid.as_raw(), signal = ?sig, "reaped signaled zombie");
            }
            Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => {
                warn!(error = %e, "waitpid error");
                break;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let ok = CommandSpec::new("true");
        assert_eq!(run(&ok).await.unwrap(), 0);

        let failing = CommandSpec::new("sh").args(["-c", "exit 3"]);
        assert_eq!(run(&failing).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_applies_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "test \"$CARE_MARKER\" = yes && test -f ./here"])
            .cwd(dir.path())
            .env("CARE_MARKER", "yes");

        assert_eq!(run(&spec).await.unwrap(), 1);
        std::fs::write(dir.path().join("here"), b"").unwrap();
        assert_eq!(run(&spec).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let spec = CommandSpec::new("/nonexistent/care-binary");
        let err = run(&spec).await.unwrap_err();
        assert_eq!(err.reason_code(), "spawn_failed");
    }
}
