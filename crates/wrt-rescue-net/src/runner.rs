use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use wrt_rescue_core::{RescueError, Result};

/// Captured result of a finished host command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Short reason for a failed command, for error messages
    pub fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.status, stderr.is_empty()) {
            (Some(code), true) => format!("exit status {code}"),
            (Some(code), false) => format!("exit status {code}: {stderr}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {stderr}"),
        }
    }
}

/// Executes host commands (`ip`, `systemctl`, `modprobe`, `arping`).
///
/// Only exit status and text output are consumed, so the host can be
/// swapped for a simulation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. `Err` only when the program could not be started.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RescueError::command(program, e.to_string()))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run and turn a non-zero exit into [`RescueError::Command`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput> {
    let output = runner.run(program, args).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(RescueError::command(
            format!("{} {}", program, args.join(" ")),
            output.reason(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons() {
        assert_eq!(CommandOutput::failed(2, "").reason(), "exit status 2");
        assert_eq!(
            CommandOutput::failed(1, "RTNETLINK answers: File exists\n").reason(),
            "exit status 1: RTNETLINK answers: File exists"
        );
        let killed = CommandOutput {
            status: None,
            ..Default::default()
        };
        assert!(!killed.success());
        assert_eq!(killed.reason(), "terminated by signal");
    }

    #[tokio::test]
    async fn system_runner_captures_output() {
        let output = SystemRunner
            .run("sh", &["-c", "echo out; echo err >&2; exit 3"])
            .await
            .expect("sh should start");
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn missing_program_is_a_command_error() {
        let result = SystemRunner
            .run("wrt-rescue-definitely-not-installed", &[])
            .await;
        assert!(matches!(result, Err(RescueError::Command { .. })));
    }

    #[tokio::test]
    async fn run_checked_rejects_non_zero_exit() {
        let err = run_checked(&SystemRunner, "sh", &["-c", "exit 4"])
            .await
            .expect_err("non-zero exit");
        assert!(err.to_string().contains("exit status 4"));
    }
}
