//! Filesystem handlers: existence checks, directory listing/tree, file
//! read/write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use beacon_sandbox::WorkingRoot;

use crate::error::HandlerError;

/// Params for `path-exists`.
#[derive(Debug, Deserialize)]
pub struct PathExistsArgs {
    /// Paths to check, as supplied by the caller (may include `~`).
    pub paths: Vec<String>,
}

/// Result of `path-exists`.
#[derive(Debug, Serialize)]
pub struct PathExistsResult {
    /// Map from the original (untrimmed) path string to whether it exists
    /// and is a directory.
    pub exists: HashMap<String, bool>,
}

/// `path-exists {paths}` → `{exists: {[original]: bool}}`.
///
/// Expands a leading `~`/`~/` to `home`. Trims and deduplicates input paths;
/// empty paths (after trimming) are ignored entirely. "Exists" here means
/// "exists and is a directory".
#[must_use]
pub fn path_exists(args: PathExistsArgs, home: &Path) -> PathExistsResult {
    let mut exists = HashMap::new();
    let mut seen = std::collections::HashSet::new();

    for raw in &args.paths {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        let expanded = beacon_sandbox::expand_tilde(Path::new(trimmed), home);
        let is_dir = expanded.is_dir();
        exists.insert(raw.clone(), is_dir);
    }

    PathExistsResult { exists }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    /// Entry's file name (not the full path).
    pub name: String,
    /// `"file"`, `"directory"`, or `"other"` (symlinks, devices, ...).
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// File size in bytes, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last-modified time in epoch milliseconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// Anything else: symlinks, sockets, devices, or a stat failure.
    Other,
}

/// Params for `listDirectory`.
#[derive(Debug, Deserialize)]
pub struct ListDirectoryArgs {
    /// Directory to list, relative to or inside the working root.
    pub path: String,
}

/// Result of `listDirectory`.
#[derive(Debug, Serialize)]
pub struct ListDirectoryResult {
    /// Entries, sorted directories-first then lexicographically.
    pub entries: Vec<DirEntry>,
}

/// `listDirectory {path}` → sorted entries. Symlinks are reported as
/// `other` with no stat; a stat failure degrades to `other` rather than
/// failing the whole call.
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] if `path` escapes `root`, or
/// [`HandlerError::Io`] if the directory cannot be read at all.
pub fn list_directory(
    args: ListDirectoryArgs,
    root: &WorkingRoot,
) -> Result<ListDirectoryResult, HandlerError> {
    let resolved = beacon_sandbox::validate_realpath(Path::new(&args.path), root)?;
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(&resolved)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push(stat_entry(name, &entry.path()));
    }

    entries.sort_by(|a, b| {
        let a_dir = a.entry_type == EntryType::Directory;
        let b_dir = b.entry_type == EntryType::Directory;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });

    Ok(ListDirectoryResult { entries })
}

fn stat_entry(name: String, path: &Path) -> DirEntry {
    let Ok(symlink_meta) = std::fs::symlink_metadata(path) else {
        return DirEntry {
            name,
            entry_type: EntryType::Other,
            size: None,
            modified: None,
        };
    };

    if symlink_meta.file_type().is_symlink() {
        return DirEntry {
            name,
            entry_type: EntryType::Other,
            size: None,
            modified: None,
        };
    }

    let Ok(meta) = std::fs::metadata(path) else {
        return DirEntry {
            name,
            entry_type: EntryType::Other,
            size: None,
            modified: None,
        };
    };

    let entry_type = if meta.is_dir() {
        EntryType::Directory
    } else if meta.is_file() {
        EntryType::File
    } else {
        EntryType::Other
    };

    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok());

    DirEntry {
        name,
        entry_type,
        size: if meta.is_file() { Some(meta.len()) } else { None },
        modified,
    }
}

/// Params for `getDirectoryTree`.
#[derive(Debug, Deserialize)]
pub struct GetDirectoryTreeArgs {
    /// Root of the tree to build.
    pub path: String,
    /// How many levels below `path` to recurse. `0` returns only the root.
    pub max_depth: u32,
}

/// A node in a recursive directory tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// Entry's file name.
    pub name: String,
    /// `"file"`, `"directory"`, or `"other"`.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Children, present only for directories that were recursed into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// `getDirectoryTree {path, maxDepth}` → recursive tree rooted at `path`.
///
/// Symlinks are pruned from the tree entirely (not even reported as
/// `other`); nodes that cannot be read are omitted from their parent's
/// children rather than failing the whole call. `max_depth == 0` returns
/// only the root node with no `children`.
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] if `path` escapes `root`.
pub fn get_directory_tree(
    args: GetDirectoryTreeArgs,
    root: &WorkingRoot,
) -> Result<TreeNode, HandlerError> {
    let resolved = beacon_sandbox::validate_realpath(Path::new(&args.path), root)?;
    let name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| resolved.display().to_string());
    Ok(build_tree_node(name, &resolved, args.max_depth))
}

fn build_tree_node(name: String, path: &Path, remaining_depth: u32) -> TreeNode {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return TreeNode {
            name,
            entry_type: EntryType::Other,
            children: None,
        };
    };

    if meta.file_type().is_symlink() {
        return TreeNode {
            name,
            entry_type: EntryType::Other,
            children: None,
        };
    }

    if !meta.is_dir() {
        return TreeNode {
            name,
            entry_type: EntryType::File,
            children: None,
        };
    }

    if remaining_depth == 0 {
        return TreeNode {
            name,
            entry_type: EntryType::Directory,
            children: None,
        };
    }

    let mut children = Vec::new();
    if let Ok(read_dir) = std::fs::read_dir(path) {
        for entry in read_dir.flatten() {
            let child_name = entry.file_name().to_string_lossy().into_owned();
            children.push(build_tree_node(child_name, &entry.path(), remaining_depth - 1));
        }
        children.sort_by(|a, b| {
            let a_dir = a.entry_type == EntryType::Directory;
            let b_dir = b.entry_type == EntryType::Directory;
            b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
        });
    }

    TreeNode {
        name,
        entry_type: EntryType::Directory,
        children: Some(children),
    }
}

/// Params for `readFile`.
#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    /// Path to read, inside the working root.
    pub path: String,
}

/// Result of `readFile`.
#[derive(Debug, Serialize)]
pub struct ReadFileResult {
    /// Base64-encoded file contents.
    pub content: String,
}

/// `readFile {path}` → `{content: base64}`. Requires both the lexical and
/// realpath sandbox checks.
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] if `path` escapes `root`, or
/// [`HandlerError::Io`] if the file cannot be read.
pub fn read_file(args: ReadFileArgs, root: &WorkingRoot) -> Result<ReadFileResult, HandlerError> {
    let resolved = beacon_sandbox::validate_realpath(Path::new(&args.path), root)?;
    let bytes = std::fs::read(&resolved)?;
    Ok(ReadFileResult {
        content: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Params for `writeFile`.
#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    /// Path to write, inside the working root.
    pub path: String,
    /// Base64-encoded new contents.
    pub content: String,
    /// If present, the file must already exist with this SHA-256; if
    /// absent/null, the file must not exist yet (creation-only semantics).
    #[serde(default)]
    pub expected_hash: Option<String>,
}

/// Result of `writeFile`.
#[derive(Debug, Serialize)]
pub struct WriteFileResult {
    /// SHA-256 (hex) of the bytes that were written.
    pub hash: String,
}

/// `writeFile {path, content, expectedHash?}` → `{hash}`.
///
/// - `expectedHash` present: the file must exist and its current SHA-256
///   must match, else [`HandlerError::Conflict`]. A missing file is a
///   distinct conflict message from a hash mismatch.
/// - `expectedHash` absent/null: the file must not exist yet; if it does,
///   [`HandlerError::Conflict`].
///
/// # Errors
///
/// Returns [`HandlerError::InvalidInput`] if `content` is not valid base64,
/// [`HandlerError::Sandbox`] if `path` escapes `root`,
/// [`HandlerError::Conflict`] on a hash/existence precondition failure, or
/// [`HandlerError::Io`] for any other I/O failure.
pub fn write_file(
    args: WriteFileArgs,
    root: &WorkingRoot,
) -> Result<WriteFileResult, HandlerError> {
    let resolved = beacon_sandbox::validate_for_write(Path::new(&args.path), root)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&args.content)
        .map_err(|e| HandlerError::InvalidInput(format!("content is not valid base64: {e}")))?;

    match &args.expected_hash {
        Some(expected) => {
            let current = std::fs::read(&resolved).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HandlerError::Conflict(format!(
                        "{} does not exist but an expected hash was supplied",
                        resolved.display()
                    ))
                } else {
                    HandlerError::Io(e)
                }
            })?;
            let actual = hex::encode(Sha256::digest(&current));
            if &actual != expected {
                return Err(HandlerError::Conflict(format!(
                    "expected hash {expected} but file is at {actual}"
                )));
            }
        },
        None => {
            if resolved.exists() {
                return Err(HandlerError::Conflict(format!(
                    "{} already exists",
                    resolved.display()
                )));
            }
        },
    }

    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&resolved, &bytes)?;
    Ok(WriteFileResult {
        hash: hex::encode(Sha256::digest(&bytes)),
    })
}

/// Absolute tilde-expansion helper reused by `path-exists` and the upload
/// staging area.
#[must_use]
pub fn home_relative(path: &str, home: &Path) -> PathBuf {
    beacon_sandbox::expand_tilde(Path::new(path), home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> WorkingRoot {
        WorkingRoot::new(dir.path().canonicalize().unwrap()).unwrap()
    }

    #[test]
    fn path_exists_dedupes_and_trims() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let args = PathExistsArgs {
            paths: vec![
                format!(" {} ", dir.path().join("sub").display()),
                dir.path().join("sub").display().to_string(),
                String::new(),
                "   ".into(),
            ],
        };
        let result = path_exists(args, Path::new("/nonexistent-home"));
        assert_eq!(result.exists.len(), 2, "both raw strings kept, blanks dropped");
    }

    #[test]
    fn list_directory_sorts_dirs_first_then_lexicographic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("z_dir")).unwrap();

        let w = root(&dir);
        let result = list_directory(
            ListDirectoryArgs {
                path: ".".to_string(),
            },
            &w,
        )
        .unwrap();

        let names: Vec<_> = result.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["z_dir", "a.txt", "b.txt"]);
    }

    #[test]
    fn get_directory_tree_max_depth_zero_has_no_children() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();
        let w = root(&dir);
        let tree = get_directory_tree(
            GetDirectoryTreeArgs {
                path: ".".to_string(),
                max_depth: 0,
            },
            &w,
        )
        .unwrap();
        assert!(tree.children.is_none());
    }

    #[test]
    fn get_directory_tree_recurses_to_max_depth() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let w = root(&dir);
        let tree = get_directory_tree(
            GetDirectoryTreeArgs {
                path: ".".to_string(),
                max_depth: 1,
            },
            &w,
        )
        .unwrap();
        let a = &tree.children.as_ref().unwrap()[0];
        assert_eq!(a.name, "a");
        assert!(a.children.as_ref().unwrap().is_empty(), "depth exhausted before b");
    }

    #[test]
    fn write_file_creation_only_rejects_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"old").unwrap();
        let w = root(&dir);
        let content = base64::engine::general_purpose::STANDARD.encode(b"new");
        let err = write_file(
            WriteFileArgs {
                path: "f.txt".into(),
                content,
                expected_hash: None,
            },
            &w,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::Conflict(_)));
    }

    #[test]
    fn write_file_missing_with_expected_hash_is_distinct_conflict() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let content = base64::engine::general_purpose::STANDARD.encode(b"new");
        let err = write_file(
            WriteFileArgs {
                path: "missing.txt".into(),
                content,
                expected_hash: Some("deadbeef".into()),
            },
            &w,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("does not exist"));
    }

    #[test]
    fn write_file_hash_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"old").unwrap();
        let w = root(&dir);
        let content = base64::engine::general_purpose::STANDARD.encode(b"new");
        let err = write_file(
            WriteFileArgs {
                path: "f.txt".into(),
                content,
                expected_hash: Some("wronghash".into()),
            },
            &w,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::Conflict(_)));
    }

    #[test]
    fn write_file_returns_hash_of_written_bytes() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let content = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let result = write_file(
            WriteFileArgs {
                path: "new.txt".into(),
                content,
                expected_hash: None,
            },
            &w,
        )
        .unwrap();
        assert_eq!(result.hash, hex::encode(Sha256::digest(b"hello")));
    }

    #[test]
    fn read_file_round_trips_write_file() {
        let dir = TempDir::new().unwrap();
        let w = root(&dir);
        let content = base64::engine::general_purpose::STANDARD.encode(b"payload");
        write_file(
            WriteFileArgs {
                path: "rt.txt".into(),
                content: content.clone(),
                expected_hash: None,
            },
            &w,
        )
        .unwrap();
        let result = read_file(
            ReadFileArgs {
                path: "rt.txt".into(),
            },
            &w,
        )
        .unwrap();
        assert_eq!(result.content, content);
    }
}
