//! The `bash` handler: run a shell command under a timeout, sandboxed to a
//! working directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use beacon_sandbox::WorkingRoot;

use crate::error::HandlerError;
use crate::process::run_with_timeout;

/// Default timeout for `bash`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Params for `bash`.
#[derive(Debug, Deserialize)]
pub struct BashArgs {
    /// Shell command line to execute.
    pub command: String,
    /// Working directory, relative to or inside the working root. Defaults
    /// to the working root itself.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Timeout in milliseconds. Defaults to 30s.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Result of `bash`.
#[derive(Debug, Serialize)]
pub struct BashResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
}

/// Run `args.command` through `/bin/sh -c`, sandboxed to `args.cwd` (or the
/// working root), bounded by `args.timeout` (or the 30s default).
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] if `cwd` escapes `root`,
/// [`HandlerError::Timeout`] if the process does not exit in time (the
/// child is killed), or [`HandlerError::Io`] if the process cannot be
/// spawned at all.
pub async fn bash(args: BashArgs, root: &WorkingRoot) -> Result<BashResult, HandlerError> {
    let cwd = match &args.cwd {
        Some(cwd) => beacon_sandbox::validate_realpath(Path::new(cwd), root)?,
        None => root.path().to_path_buf(),
    };
    let timeout = args
        .timeout
        .map_or(DEFAULT_TIMEOUT, Duration::from_millis);

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(&args.command).current_dir(&cwd);

    let output = run_with_timeout(cmd, timeout).await?;
    Ok(BashResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> WorkingRoot {
        WorkingRoot::new(dir.path().canonicalize().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn bash_captures_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let result = bash(
            BashArgs {
                command: "echo hi".into(),
                cwd: None,
                timeout: None,
            },
            &w,
        )
        .await
        .unwrap();
        assert_eq!(result.stdout.trim(), "hi");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn bash_times_out_long_running_commands() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let err = bash(
            BashArgs {
                command: "sleep 5".into(),
                cwd: None,
                timeout: Some(50),
            },
            &w,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn bash_timeout_kills_child_and_captures_partial_output() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let err = bash(
            BashArgs {
                command: "echo partial; sleep 5".into(),
                cwd: None,
                timeout: Some(100),
            },
            &w,
        )
        .await
        .unwrap_err();
        match err {
            HandlerError::Timeout { stdout, .. } => assert_eq!(stdout.trim(), "partial"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bash_rejects_cwd_outside_sandbox() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let err = bash(
            BashArgs {
                command: "pwd".into(),
                cwd: Some("/etc".into()),
                timeout: None,
            },
            &w,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::Sandbox(_)));
    }
}
