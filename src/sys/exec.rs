//! Command execution chokepoint.
//!
//! Every privileged operation in the panel funnels through [`CommandRunner`]:
//! one external program, combined stdout+stderr captured as a single blob,
//! exit status folded into a uniform [`ActionResult`]. No timeouts, no
//! streaming; the caller blocks for the duration of the child process.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::sys::php::PhpVersion;
use crate::sys::service::ServiceState;
use crate::sys::ssl::Certificate;

// ==============================================================================
// 1. Result envelope
// ==============================================================================

/// Typed payload attached to successful read procedures (status, list).
/// Closed set: every read-model the panel produces appears here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum ActionData {
    Service(ServiceState),
    Services(Vec<ServiceState>),
    Certificates(Vec<Certificate>),
    PhpVersions(Vec<PhpVersion>),
}

/// Uniform outcome of every orchestration operation.
///
/// Invariant: `success == false` implies `error` is set or `message` is
/// non-empty. `data` is populated only on successful reads.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ActionData>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            data: None,
        }
    }

    /// Operator declined a destructive confirmation. Not a failure: the
    /// CLI exits zero and nothing was executed.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: ActionData) -> Self {
        self.data = Some(data);
        self
    }
}

// ==============================================================================
// 2. Runner trait + system implementation
// ==============================================================================

/// Seam over external command execution. Production uses [`SystemRunner`];
/// tests substitute a recording mock so no procedure touches the host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion, capturing combined stdout+stderr.
    /// Exit zero ⇔ success; launch failure or non-zero exit sets `error`.
    async fn run(&self, program: &str, args: &[&str]) -> ActionResult;

    /// Same contract, but `input` is piped into the child's stdin. Used
    /// for `tee` config writes, `crontab -` and debconf preseeding.
    async fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> ActionResult;
}

pub struct SystemRunner;

impl SystemRunner {
    fn fold_output(program: &str, output: std::process::Output) -> ActionResult {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            ActionResult::ok(combined)
        } else {
            ActionResult::fail(combined, format!("{} exited with {}", program, output.status))
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ActionResult {
        match Command::new(program).args(args).output().await {
            Ok(output) => Self::fold_output(program, output),
            Err(e) => ActionResult::fail(String::new(), format!("failed to launch {}: {}", program, e)),
        }
    }

    async fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> ActionResult {
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ActionResult::fail(String::new(), format!("failed to launch {}: {}", program, e));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                return ActionResult::fail(String::new(), format!("failed to feed stdin of {}: {}", program, e));
            }
            // Close stdin so line-oriented consumers (crontab, tee) see EOF.
        }

        match child.wait_with_output().await {
            Ok(output) => Self::fold_output(program, output),
            Err(e) => ActionResult::fail(String::new(), format!("failed to wait for {}: {}", program, e)),
        }
    }
}

// ==============================================================================
// 3. Filesystem helpers routed through the runner
// ==============================================================================

pub async fn file_exists(runner: &dyn CommandRunner, path: &str) -> bool {
    runner.run("test", &["-f", path]).await.success
}

pub async fn dir_exists(runner: &dyn CommandRunner, path: &str) -> bool {
    runner.run("test", &["-d", path]).await.success
}

pub async fn create_directory(runner: &dyn CommandRunner, path: &str) -> ActionResult {
    runner.run("mkdir", &["-p", path]).await
}

/// Write a config file by piping content to a privileged `tee`, never a
/// native filesystem call. Keeps every host mutation on the runner seam.
pub async fn write_file(runner: &dyn CommandRunner, path: &str, content: &str) -> ActionResult {
    let result = runner.run_with_stdin("tee", &[path], content).await;
    if result.success {
        ActionResult::ok("File written successfully")
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_is_success() {
        let result = SystemRunner.run("sh", &["-c", "exit 0"]).await;
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_error() {
        let result = SystemRunner.run("sh", &["-c", "exit 3"]).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_combined() {
        let result = SystemRunner
            .run("sh", &["-c", "echo out; echo err 1>&2"])
            .await;
        assert!(result.success);
        assert!(result.message.contains("out"));
        assert!(result.message.contains("err"));
    }

    #[tokio::test]
    async fn missing_binary_is_launch_failure() {
        let result = SystemRunner.run("/nonexistent/ironpanel-test-bin", &[]).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("failed to launch"));
    }

    #[tokio::test]
    async fn stdin_is_piped_to_child() {
        let result = SystemRunner.run_with_stdin("cat", &[], "piped content").await;
        assert!(result.success);
        assert_eq!(result.message, "piped content");
    }

    #[tokio::test]
    async fn captured_output_survives_failure() {
        let result = SystemRunner
            .run("sh", &["-c", "echo partial; exit 1"])
            .await;
        assert!(!result.success);
        assert!(result.message.contains("partial"));
    }

    #[test]
    fn failure_always_carries_a_cause() {
        let result = ActionResult::fail("", "unsupported package manager");
        assert!(!result.success);
        assert!(result.error.is_some() || !result.message.is_empty());
    }

    #[test]
    fn cancelled_is_not_a_failure() {
        let result = ActionResult::cancelled("Apache uninstall cancelled");
        assert!(result.success);
        assert!(result.error.is_none());
    }
}
