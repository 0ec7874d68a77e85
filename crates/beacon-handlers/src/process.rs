//! Shared run-under-timeout plumbing for `bash`/`ripgrep`/`difftastic`/`git`.
//!
//! `tokio::process::Child::wait_with_output` consumes the child, so wrapping
//! it in `tokio::time::timeout` and letting the timeout elapse simply drops
//! the future — the child keeps running, orphaned, and any output it had
//! already written is lost. This module pipes stdout/stderr into buffers
//! owned outside the timed future, so a kill on timeout both reaps the
//! process and preserves whatever it had already printed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::HandlerError;

/// Output of a subprocess that ran to completion.
pub struct ProcessOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code.
    pub exit_code: Option<i32>,
}

/// Spawn `cmd` with piped stdout/stderr, drive it to completion bounded by
/// `timeout`. On elapse, kill the child and return
/// [`HandlerError::Timeout`] carrying whatever had been written so far.
///
/// # Errors
///
/// Returns [`HandlerError::Io`] if the process cannot be spawned or its
/// pipes cannot be read, or [`HandlerError::Timeout`] if `timeout` elapses
/// before the process exits.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<ProcessOutput, HandlerError> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| HandlerError::Io(std::io::Error::other("child spawned without a stdout pipe")))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| HandlerError::Io(std::io::Error::other("child spawned without a stderr pipe")))?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let run = async {
        tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
            child.wait(),
        )
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((stdout_result, stderr_result, wait_result)) => {
            stdout_result.map_err(HandlerError::Io)?;
            stderr_result.map_err(HandlerError::Io)?;
            let status = wait_result.map_err(HandlerError::Io)?;
            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                exit_code: status.code(),
            })
        },
        Err(_elapsed) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(HandlerError::Timeout {
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            })
        },
    }
}
