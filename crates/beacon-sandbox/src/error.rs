use std::path::PathBuf;

/// Failure modes for path validation.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The resolved path is not the working root or a descendant of it.
    #[error("{path} is outside working directory {root}", path = path.display(), root = root.display())]
    OutsideWorkingDirectory {
        /// The path that was rejected (lexically resolved, not canonicalized).
        path: PathBuf,
        /// The working root it was checked against.
        root: PathBuf,
    },
    /// The path resolves lexically inside the working root, but a symlink
    /// along the way points outside the canonical working root.
    #[error("{path} resolves to {resolved} outside the working directory", path = path.display(), resolved = resolved.display())]
    SymlinkTraversal {
        /// The original (lexically validated) path.
        path: PathBuf,
        /// Where it actually resolves to.
        resolved: PathBuf,
    },
    /// Neither the path nor any of its ancestors could be resolved by the OS.
    #[error("cannot resolve path: {0}")]
    CannotResolve(String),
}
