//! External command execution.
//!
//! Everything the workflow knows about a Bluetooth controller or an audio
//! stack it learns from the human-readable output of external tools. This
//! module is the only place that spawns those tools for request/response
//! commands: [`CommandRunner`] is the seam (tests script it), and
//! [`SystemRunner`] is the real implementation over `tokio::process`.
//!
//! Output interpretation follows one rule everywhere: a caller-supplied
//! validator judges stdout, and a failing validator, non-empty stderr, or a
//! failing exit status all surface as [`Error::CommandFailed`] carrying the
//! captured stdout — the text is the only diagnostic these tools provide.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
    /// Whether the process exited successfully.
    pub success: bool,
}

/// Executes external programs and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error only when the process cannot be spawned or awaited;
    /// tool-level failures are reported through [`CommandOutput`].
    async fn execute(&self, program: &Path, args: &[&str]) -> Result<CommandOutput>;
}

/// Renders a command line for logs and diagnostics.
#[must_use]
pub fn render_command(program: &Path, args: &[&str]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs a command and checks its output.
///
/// `is_valid` judges the captured stdout. Validation failure, non-empty
/// stderr, and a failing exit status are all reported as
/// [`Error::CommandFailed`] with the stdout attached, so callers can inspect
/// what the tool actually printed.
///
/// # Errors
///
/// Returns [`Error::CommandFailed`] as described above, or a spawn error
/// from the runner.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &Path,
    args: &[&str],
    is_valid: impl Fn(&str) -> bool + Send,
) -> Result<String> {
    let output = runner.execute(program, args).await?;
    if !is_valid(&output.stdout) || !output.stderr.is_empty() || !output.success {
        return Err(Error::CommandFailed {
            command: render_command(program, args),
            output: output.stdout,
        });
    }
    Ok(output.stdout)
}

/// Runs a command, accepting any output as long as the tool itself succeeds.
///
/// # Errors
///
/// Same failure conditions as [`run_checked`] minus the validator.
pub async fn run(runner: &dyn CommandRunner, program: &Path, args: &[&str]) -> Result<String> {
    run_checked(runner, program, args, |_| true).await
}

/// Real command runner spawning processes on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    privileged: bool,
}

impl SystemRunner {
    /// Creates a runner. With `privileged` set, Bluetooth management tools
    /// are wrapped in `sudo` (controller access needs CAP_NET_ADMIN outside
    /// Termux).
    #[must_use]
    pub fn new(privileged: bool) -> Self {
        Self { privileged }
    }

    fn needs_sudo(&self, program: &Path) -> bool {
        if !self.privileged {
            return false;
        }
        matches!(
            program.file_name().and_then(|n| n.to_str()),
            Some("bluetoothctl" | "btmgmt")
        )
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn execute(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        debug!(command = %render_command(program, args), "executing");

        let output = if self.needs_sudo(program) {
            Command::new("sudo").arg(program).args(args).output().await?
        } else {
            Command::new(program).args(args).output().await?
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{any_tool, ScriptedRunner};
    use super::*;

    #[tokio::test]
    async fn run_checked_accepts_valid_output() {
        let runner = ScriptedRunner::new();
        runner.push_ok("all good");

        let out = run(&runner, &any_tool(), &["arg"]).await.unwrap();
        assert_eq!(out, "all good");
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn failing_validator_attaches_stdout() {
        let runner = ScriptedRunner::new();
        runner.push_ok("something failed here");

        let err = run_checked(&runner, &any_tool(), &[], |out| !out.contains("failed"))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { output, .. } => {
                assert!(output.contains("something failed here"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_exit_status_is_a_command_failure() {
        let runner = ScriptedRunner::new();
        runner.push_failure("tool exploded");

        let err = run(&runner, &any_tool(), &[]).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[test]
    fn render_command_joins_program_and_args() {
        let line = render_command(Path::new("/usr/bin/btmgmt"), &["bondable", "true"]);
        assert_eq!(line, "/usr/bin/btmgmt bondable true");
    }
}
