/// Failure modes from pseudo-terminal allocation and I/O.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    /// No terminal is registered under this id.
    #[error("unknown terminal id {0}")]
    UnknownTerminal(String),
    /// A terminal with this id already exists.
    #[error("terminal id {0} already open")]
    AlreadyOpen(String),
    /// The underlying PTY could not be allocated or resized.
    #[error("pty error: {0}")]
    Pty(#[from] anyhow::Error),
    /// Writing to or killing the child process failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
