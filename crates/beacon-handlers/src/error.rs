//! Failure modes surfaced by the sandboxed handlers.

use beacon_sandbox::SandboxError;
use serde_json::Value;

/// Failure modes for the handlers installed on every connector.
///
/// Every variant maps onto an error *kind* from the wire error taxonomy
/// (`invalid-input`, `sandbox-violation`, `not-found`, `conflict`,
/// `timeout`, `transient`); handlers never surface language-level panics to
/// callers, only these.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A required field was missing or malformed.
    #[error("{0}")]
    InvalidInput(String),
    /// The path sandbox rejected the requested path.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// A blocked flag was present in a subprocess argument list.
    #[error("Blocked flag: {0}")]
    BlockedFlag(String),
    /// The requested file, directory, or id does not exist.
    #[error("{0}")]
    NotFound(String),
    /// A compare-and-swap-style precondition failed (hash mismatch, file
    /// already exists, upload session mismatch).
    #[error("{0}")]
    Conflict(String),
    /// A subprocess exceeded its allotted time and was killed. Carries
    /// whatever stdout/stderr the process had written before the kill.
    #[error("Command timed out")]
    Timeout {
        /// Stdout captured before the process was killed.
        stdout: String,
        /// Stderr captured before the process was killed.
        stderr: String,
    },
    /// An I/O operation failed for a reason other than the above.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// Extra context fields merged into the failure envelope alongside
    /// `error`. Only [`HandlerError::Timeout`] carries any.
    pub(crate) fn context(&self) -> Value {
        match self {
            HandlerError::Timeout { stdout, stderr } => {
                serde_json::json!({ "stdout": stdout, "stderr": stderr })
            },
            _ => Value::Null,
        }
    }
}
