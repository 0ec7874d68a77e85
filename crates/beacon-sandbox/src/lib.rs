//! Path sandboxing: decide whether a user-supplied path may be touched.
//!
//! Every filesystem-facing RPC handler calls through here before touching
//! disk. Validation happens in two stages:
//!
//! 1. [`validate_lexical`] resolves the path against the working root
//!    purely as strings/components, with no filesystem access. This catches
//!    the common case (`../../etc/passwd`) cheaply.
//! 2. [`validate_realpath`] additionally resolves symlinks via the OS
//!    canonicalizer, so a symlink planted inside the working root that
//!    points outside it is caught too. This stage is skipped for operations
//!    that never follow links (existence checks), and used for everything
//!    that touches file contents (read, write, list, tree).

use std::path::{Component, Path, PathBuf};

mod error;

pub use error::SandboxError;

/// The absolute directory every sandboxed operation is validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingRoot(PathBuf);

impl WorkingRoot {
    /// Wrap an absolute path as a working root.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::CannotResolve`] if `root` is not absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(SandboxError::CannotResolve(format!(
                "working root must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self(root))
    }

    /// The working root's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Case-fold a path for comparison on platforms with case-insensitive
/// filesystems (Windows). On every other platform this is the identity
/// function.
fn fold_case(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    }
    #[cfg(not(windows))]
    {
        path.to_path_buf()
    }
}

/// Join `target` onto `root` (if relative) and collapse `.`/`..` components
/// purely lexically — no filesystem access, so this works for paths that
/// don't exist yet.
fn lexical_join(target: &Path, root: &Path) -> PathBuf {
    let absolute = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            },
            Component::CurDir => {},
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Stage 1: resolve `target` against `root` lexically and confirm the
/// result is the root or a descendant of it.
///
/// # Errors
///
/// Returns [`SandboxError::OutsideWorkingDirectory`] if the resolved path is
/// not the root and does not begin with `root` + a path separator.
pub fn validate_lexical(target: &Path, root: &WorkingRoot) -> Result<PathBuf, SandboxError> {
    let resolved = lexical_join(target, root.path());
    let folded_resolved = fold_case(&resolved);
    let folded_root = fold_case(root.path());

    if folded_resolved == folded_root || folded_resolved.starts_with(&folded_root) {
        Ok(resolved)
    } else {
        Err(SandboxError::OutsideWorkingDirectory {
            path: resolved,
            root: root.path().to_path_buf(),
        })
    }
}

/// Stage 2: like [`validate_lexical`], but additionally walks the canonical
/// (symlink-resolved) form of the path and every ancestor that exists, to
/// catch a symlink inside the working root that points outside it.
///
/// If the target does not exist yet, its last path segment is stripped and
/// the parent is canonicalized instead — this is what allows creating a
/// not-yet-existing file inside the sandbox.
///
/// # Errors
///
/// Returns [`SandboxError::OutsideWorkingDirectory`] if the lexical stage
/// fails, [`SandboxError::SymlinkTraversal`] if the canonical resolution
/// escapes the canonical working root, or [`SandboxError::CannotResolve`] if
/// no ancestor of the path can be canonicalized at all.
pub fn validate_realpath(target: &Path, root: &WorkingRoot) -> Result<PathBuf, SandboxError> {
    let lexical = validate_lexical(target, root)?;

    let canonical_root = root.path().canonicalize().map_err(|e| {
        SandboxError::CannotResolve(format!(
            "working root {} does not exist: {e}",
            root.path().display()
        ))
    })?;

    let canonical = canonicalize_allowing_missing_tail(&lexical)?;
    let folded_canonical = fold_case(&canonical);
    let folded_root = fold_case(&canonical_root);

    if folded_canonical == folded_root || folded_canonical.starts_with(&folded_root) {
        Ok(lexical)
    } else {
        Err(SandboxError::SymlinkTraversal {
            path: lexical,
            resolved: canonical,
        })
    }
}

/// Canonicalize `path`, stripping trailing segments that don't exist yet
/// (so creating a new file inside an existing directory is still valid).
fn canonicalize_allowing_missing_tail(path: &Path) -> Result<PathBuf, SandboxError> {
    let mut probe = path.to_path_buf();
    let mut missing_tail = PathBuf::new();

    loop {
        match probe.canonicalize() {
            Ok(canonical) => return Ok(canonical.join(missing_tail)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(file_name) = probe.file_name().map(std::ffi::OsStr::to_owned) else {
                    return Err(SandboxError::CannotResolve(format!(
                        "no existing ancestor for {}",
                        path.display()
                    )));
                };
                let mut rebuilt = PathBuf::from(&file_name);
                rebuilt.push(&missing_tail);
                missing_tail = rebuilt;
                if !probe.pop() {
                    return Err(SandboxError::CannotResolve(format!(
                        "no existing ancestor for {}",
                        path.display()
                    )));
                }
            },
            Err(e) => {
                return Err(SandboxError::CannotResolve(format!(
                    "cannot resolve {}: {e}",
                    path.display()
                )));
            },
        }
    }
}

/// Validate a path that will be used to create a not-yet-existing file or
/// directory: identical to [`validate_realpath`], documented separately
/// because callers (`writeFile`, multipart upload completion) care about
/// this specific allowance.
pub fn validate_for_write(target: &Path, root: &WorkingRoot) -> Result<PathBuf, SandboxError> {
    validate_realpath(target, root)
}

/// Expand a leading `~` or `~/` to the given home directory. Paths that
/// don't start with `~` are returned unchanged.
#[must_use]
pub fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    home.join(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> WorkingRoot {
        WorkingRoot::new(dir.path().canonicalize().unwrap()).unwrap()
    }

    #[test]
    fn dot_and_self_are_valid() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        assert!(validate_lexical(Path::new("."), &w).is_ok());
        assert!(validate_lexical(w.path(), &w).is_ok());
    }

    #[test]
    fn parent_traversal_rejected_lexically() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let err = validate_lexical(Path::new("../escape"), &w).unwrap_err();
        assert!(matches!(err, SandboxError::OutsideWorkingDirectory { .. }));
    }

    #[test]
    fn nonexistent_file_inside_sandbox_is_valid_for_realpath() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let result = validate_realpath(Path::new("not-yet-created.txt"), &w);
        assert!(result.is_ok());
    }

    #[test]
    fn symlink_escape_is_rejected() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), b"top secret").unwrap();

        let inside = TempDir::new().unwrap();
        let link = inside.path().join("link");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("secret"), &link).unwrap();
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(outside.path().join("secret"), &link).unwrap();

        let w = root(&inside);
        let err = validate_realpath(Path::new("link"), &w).unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkTraversal { .. }));
    }

    #[test]
    fn root_itself_is_valid() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        assert!(validate_realpath(Path::new("."), &w).is_ok());
    }

    #[test]
    fn sibling_directory_sharing_a_prefix_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root_path = dir.path().join("project");
        fs::create_dir(&root_path).unwrap();
        let sibling = dir.path().join("project-evil");
        fs::create_dir(&sibling).unwrap();

        let w = WorkingRoot::new(root_path.canonicalize().unwrap()).unwrap();
        let err = validate_lexical(&sibling, &w).unwrap_err();
        assert!(matches!(err, SandboxError::OutsideWorkingDirectory { .. }));
    }

    #[test]
    fn expand_tilde_only_touches_leading_tilde() {
        let home = Path::new("/home/user");
        assert_eq!(
            expand_tilde(Path::new("~/docs"), home),
            PathBuf::from("/home/user/docs")
        );
        assert_eq!(
            expand_tilde(Path::new("/already/absolute"), home),
            PathBuf::from("/already/absolute")
        );
    }

    proptest::proptest! {
        #[test]
        fn lexical_join_never_panics(segments in proptest::collection::vec("[a-zA-Z0-9._]{0,6}", 0..8)) {
            let dir = TempDir::new().unwrap();
            let root = WorkingRoot::new(dir.path().canonicalize().unwrap()).unwrap();
            let mut target = PathBuf::new();
            for s in &segments {
                target.push(s);
            }
            let _ = validate_lexical(&target, &root);
        }
    }
}
