//! Shell command execution for `${cmd: …}` placeholders
//!
//! The command text is opaque to the hub: it is handed to the OS shell
//! verbatim, never re-tokenized here. Execution sits behind a trait so
//! tests substitute a stub and resolution stays deterministic.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Default wall-clock budget for one resolver command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes a resolver command and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and return stdout with trailing whitespace trimmed.
    /// The error string is a human-readable failure reason.
    async fn run(&self, command: &str) -> Result<String, String>;
}

/// Runs commands through `sh -c`.
pub struct ShellCommandRunner {
    timeout: Duration,
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str) -> Result<String, String> {
        debug!(command = %command, "Executing resolver command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to spawn shell: {}", e)),
            Err(_) => return Err(format!("timed out after {:?}", self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "exited with {} ({})",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_shell_command_and_trims_trailing_whitespace() {
        let runner = ShellCommandRunner::new();
        let out = runner.run("echo hi").await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn shell_reserved_characters_are_deferred_to_the_shell() {
        let runner = ShellCommandRunner::new();
        let out = runner.run("echo a && echo b").await.unwrap();
        assert_eq!(out, "a\nb");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let runner = ShellCommandRunner::new();
        let err = runner.run("exit 3").await.unwrap_err();
        assert!(err.contains("exited"));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let runner = ShellCommandRunner::new().with_timeout(Duration::from_millis(50));
        let err = runner.run("sleep 5").await.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
