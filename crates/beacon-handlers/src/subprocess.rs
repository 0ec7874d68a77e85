//! `ripgrep`/`difftastic` wrappers (argument-blocklisted) and fixed-argument
//! `git` inspection wrappers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use beacon_sandbox::WorkingRoot;

use crate::error::HandlerError;
use crate::process::run_with_timeout;

/// Default timeout for `git` subprocesses.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Flags rejected outright for `ripgrep`: each can be used to execute
/// arbitrary commands or read arbitrary paths outside the sandbox.
const RIPGREP_BLOCKLIST: &[&str] = &["--pre", "--config", "--config-path", "--type-add"];

/// Flags rejected outright for `difftastic`.
const DIFFTASTIC_BLOCKLIST: &[&str] = &["--config", "--config-file"];

/// Params shared by `ripgrep` and `difftastic`.
#[derive(Debug, Deserialize)]
pub struct SubprocessArgs {
    /// Raw argv, excluding the program name.
    pub args: Vec<String>,
    /// Working directory, relative to or inside the working root.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Output of a sandboxed subprocess invocation.
#[derive(Debug, Serialize)]
pub struct SubprocessResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
}

/// Check `args` against `blocklist`: a flag matches if it equals a blocked
/// entry exactly, or starts with `flag=`.
///
/// # Errors
///
/// Returns [`HandlerError::BlockedFlag`] naming the first blocked flag
/// found.
fn reject_blocked_flags(args: &[String], blocklist: &[&str]) -> Result<(), HandlerError> {
    for arg in args {
        for blocked in blocklist {
            if arg == blocked || arg.starts_with(&format!("{blocked}=")) {
                return Err(HandlerError::BlockedFlag((*blocked).to_string()));
            }
        }
    }
    Ok(())
}

async fn run_sandboxed(
    program: &str,
    args: &[String],
    cwd: Option<&str>,
    root: &WorkingRoot,
    timeout: Duration,
) -> Result<SubprocessResult, HandlerError> {
    let resolved_cwd = match cwd {
        Some(cwd) => beacon_sandbox::validate_realpath(Path::new(cwd), root)?,
        None => root.path().to_path_buf(),
    };

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(&resolved_cwd);

    let output = run_with_timeout(cmd, timeout).await?;
    Ok(SubprocessResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
    })
}

/// `ripgrep {args, cwd?}` → subprocess output, rejecting blocked flags
/// before spawning anything.
///
/// # Errors
///
/// Returns [`HandlerError::BlockedFlag`], [`HandlerError::Sandbox`], or
/// [`HandlerError::Timeout`]/[`HandlerError::Io`] per [`run_sandboxed`].
pub async fn ripgrep(
    args: SubprocessArgs,
    root: &WorkingRoot,
) -> Result<SubprocessResult, HandlerError> {
    reject_blocked_flags(&args.args, RIPGREP_BLOCKLIST)?;
    run_sandboxed(
        "rg",
        &args.args,
        args.cwd.as_deref(),
        root,
        crate::bash::DEFAULT_TIMEOUT,
    )
    .await
}

/// `difftastic {args, cwd?}` → subprocess output, rejecting blocked flags
/// before spawning anything.
///
/// # Errors
///
/// See [`ripgrep`].
pub async fn difftastic(
    args: SubprocessArgs,
    root: &WorkingRoot,
) -> Result<SubprocessResult, HandlerError> {
    reject_blocked_flags(&args.args, DIFFTASTIC_BLOCKLIST)?;
    run_sandboxed(
        "difft",
        &args.args,
        args.cwd.as_deref(),
        root,
        crate::bash::DEFAULT_TIMEOUT,
    )
    .await
}

/// Params shared by the `git-*` inspection handlers.
#[derive(Debug, Deserialize)]
pub struct GitArgs {
    /// Working directory, relative to or inside the working root.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// `git-status {cwd?}` → `git status --porcelain=v1` output. Argument set is
/// fixed and non-configurable.
///
/// # Errors
///
/// See [`run_sandboxed`].
pub async fn git_status(
    args: GitArgs,
    root: &WorkingRoot,
) -> Result<SubprocessResult, HandlerError> {
    run_sandboxed(
        "git",
        &["status".to_string(), "--porcelain=v1".to_string()],
        args.cwd.as_deref(),
        root,
        GIT_TIMEOUT,
    )
    .await
}

/// `git-diff-numstat {cwd?}` → `git diff --numstat` output.
///
/// # Errors
///
/// See [`run_sandboxed`].
pub async fn git_diff_numstat(
    args: GitArgs,
    root: &WorkingRoot,
) -> Result<SubprocessResult, HandlerError> {
    run_sandboxed(
        "git",
        &["diff".to_string(), "--numstat".to_string()],
        args.cwd.as_deref(),
        root,
        GIT_TIMEOUT,
    )
    .await
}

/// Params for `git-diff-file`.
#[derive(Debug, Deserialize)]
pub struct GitDiffFileArgs {
    /// Path (relative to `cwd`) to diff.
    pub path: String,
    /// Working directory, relative to or inside the working root.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// `git-diff-file {path, cwd?}` → `git diff -- <path>` output. `path` is
/// sandboxed like any other filesystem-facing argument before being passed
/// to `git`.
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] if `path` escapes `root`, otherwise as
/// [`run_sandboxed`].
pub async fn git_diff_file(
    args: GitDiffFileArgs,
    root: &WorkingRoot,
) -> Result<SubprocessResult, HandlerError> {
    let cwd = match &args.cwd {
        Some(cwd) => beacon_sandbox::validate_realpath(Path::new(cwd), root)?,
        None => root.path().to_path_buf(),
    };
    // Re-validate the target path relative to the resolved cwd, not just the
    // working root, since `git diff` resolves paths relative to `cwd`.
    let cwd_root = WorkingRoot::new(cwd.clone())
        .map_err(|_| HandlerError::InvalidInput("cwd must be absolute".to_string()))?;
    beacon_sandbox::validate_realpath(Path::new(&args.path), &cwd_root)?;

    run_sandboxed(
        "git",
        &["diff".to_string(), "--".to_string(), args.path.clone()],
        args.cwd.as_deref(),
        root,
        GIT_TIMEOUT,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_blocked_flag_is_rejected() {
        let err = reject_blocked_flags(
            &["--pre".to_string(), "/tmp/x".to_string()],
            RIPGREP_BLOCKLIST,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::BlockedFlag(f) if f == "--pre"));
    }

    #[test]
    fn flag_equals_prefix_is_rejected() {
        let err =
            reject_blocked_flags(&["--config=/tmp/evil.toml".to_string()], RIPGREP_BLOCKLIST)
                .unwrap_err();
        assert!(matches!(err, HandlerError::BlockedFlag(f) if f == "--config"));
    }

    #[test]
    fn unrelated_flags_pass() {
        assert!(reject_blocked_flags(
            &["--type".to_string(), "rust".to_string(), "foo".to_string()],
            RIPGREP_BLOCKLIST,
        )
        .is_ok());
    }

    #[test]
    fn substring_flag_is_not_falsely_blocked() {
        // `--type-add` is blocked, but `--type` (a prefix of it, not vice
        // versa) must not be.
        assert!(reject_blocked_flags(&["--type".to_string()], RIPGREP_BLOCKLIST).is_ok());
    }
}
