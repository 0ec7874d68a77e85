//! Session-scoped upload staging area.
//!
//! Each session gets a disjoint subdirectory of a process-wide blobs root,
//! created lazily on first upload. Single-shot uploads go through
//! [`UploadRegistry::upload_file`]; larger transfers use the
//! `uploadMultipartStart/Chunk/Complete/Abort` sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use beacon_core::{EpochMillis, UploadId};

use crate::error::HandlerError;

/// Hard cap on any single uploaded file, enforced both on the estimated
/// base64 size and on the actual decoded byte count.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Sanitize a user-supplied filename for use on disk: path separators,
/// `..`, and whitespace become `_`; the result is capped at 255 characters;
/// an empty result is replaced with `"upload"`.
///
/// Idempotent: `sanitize_filename(sanitize_filename(x)) == sanitize_filename(x)`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let without_dotdot = replaced.replace("..", "_");
    let truncated: String = without_dotdot.chars().take(255).collect();
    if truncated.is_empty() {
        "upload".to_string()
    } else {
        truncated
    }
}

/// Build the on-disk name for a freshly staged upload: `{timestamp}-{sanitized}`.
#[must_use]
pub fn unique_name(filename: &str, now: EpochMillis) -> String {
    format!("{}-{}", now.as_millis(), sanitize_filename(filename))
}

/// Estimate the decoded byte length of a base64 string without decoding it.
fn estimate_decoded_len(base64_str: &str) -> u64 {
    let len = base64_str.len() as u64;
    (len * 3) / 4
}

struct MultipartUpload {
    session_key: String,
    file_path: PathBuf,
    bytes_written: u64,
}

/// Staging area for uploads, scoped per machine (one blobs root) and per
/// session (one subdirectory each).
pub struct UploadRegistry {
    blobs_root: PathBuf,
    session_dirs: Mutex<HashMap<String, PathBuf>>,
    multipart: Mutex<HashMap<UploadId, MultipartUpload>>,
}

impl UploadRegistry {
    /// Create a registry rooted at `blobs_root`. The root itself is created
    /// lazily on first upload, not here.
    #[must_use]
    pub fn new(blobs_root: PathBuf) -> Self {
        Self {
            blobs_root,
            session_dirs: Mutex::new(HashMap::new()),
            multipart: Mutex::new(HashMap::new()),
        }
    }

    /// Return (creating if necessary) the upload directory for `session_key`.
    async fn session_dir(&self, session_key: &str) -> Result<PathBuf, HandlerError> {
        let mut dirs = self.session_dirs.lock().await;
        if let Some(existing) = dirs.get(session_key) {
            return Ok(existing.clone());
        }

        let sanitized = sanitize_filename(session_key);
        let suffix = fastrand::u64(..);
        let dir = self.blobs_root.join(format!("{sanitized}-{suffix:x}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(HandlerError::Io)?;
        dirs.insert(session_key.to_string(), dir.clone());
        Ok(dir)
    }

    /// Single-shot upload: decode `content` (base64) and write it under the
    /// session's directory with a sanitized, unique name.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidInput`] if `content` is not valid
    /// base64 or exceeds [`MAX_UPLOAD_BYTES`] either as estimated or once
    /// decoded.
    pub async fn upload_file(
        &self,
        session_key: &str,
        filename: &str,
        content: &str,
    ) -> Result<UploadedFile, HandlerError> {
        if estimate_decoded_len(content) > MAX_UPLOAD_BYTES {
            return Err(HandlerError::InvalidInput(
                "File too large (max 50MB)".to_string(),
            ));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| HandlerError::InvalidInput(format!("content is not valid base64: {e}")))?;
        if bytes.len() as u64 > MAX_UPLOAD_BYTES {
            return Err(HandlerError::InvalidInput(
                "File too large (max 50MB)".to_string(),
            ));
        }

        let dir = self.session_dir(session_key).await?;
        let name = unique_name(filename, EpochMillis::now());
        let path = dir.join(&name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(HandlerError::Io)?;

        Ok(UploadedFile {
            file_path: path,
            bytes_written: bytes.len() as u64,
        })
    }

    /// Begin a multipart upload: allocate an id and reserve the final file
    /// path, writing nothing yet.
    pub async fn multipart_start(
        &self,
        session_key: &str,
        filename: &str,
    ) -> Result<UploadId, HandlerError> {
        let dir = self.session_dir(session_key).await?;
        let name = unique_name(filename, EpochMillis::now());
        let file_path = dir.join(&name);
        tokio::fs::write(&file_path, []).await.map_err(HandlerError::Io)?;

        let upload_id = UploadId::new(uuid::Uuid::new_v4().to_string());
        self.multipart.lock().await.insert(
            upload_id.clone(),
            MultipartUpload {
                session_key: session_key.to_string(),
                file_path,
                bytes_written: 0,
            },
        );
        Ok(upload_id)
    }

    /// Append one base64-encoded chunk to an in-progress multipart upload.
    ///
    /// If this chunk would cross [`MAX_UPLOAD_BYTES`], the partial file is
    /// deleted, the upload is forgotten, and an error is returned — the
    /// caller must restart the upload from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::NotFound`] for an unknown `upload_id`, or
    /// [`HandlerError::InvalidInput`] for malformed base64 or a cap breach.
    pub async fn multipart_chunk(
        &self,
        upload_id: &UploadId,
        chunk: &str,
    ) -> Result<u64, HandlerError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(chunk)
            .map_err(|e| HandlerError::InvalidInput(format!("chunk is not valid base64: {e}")))?;

        let mut multipart = self.multipart.lock().await;
        let Some(upload) = multipart.get_mut(upload_id) else {
            return Err(HandlerError::NotFound(format!(
                "unknown upload id {upload_id}"
            )));
        };

        let prospective_total = upload.bytes_written + bytes.len() as u64;
        if prospective_total > MAX_UPLOAD_BYTES {
            let path = upload.file_path.clone();
            multipart.remove(upload_id);
            drop(multipart);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(HandlerError::InvalidInput(
                "File too large (max 50MB)".to_string(),
            ));
        }

        use tokio::io::AsyncWriteExt as _;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&upload.file_path)
            .await
            .map_err(HandlerError::Io)?;
        file.write_all(&bytes).await.map_err(HandlerError::Io)?;
        upload.bytes_written = prospective_total;
        Ok(upload.bytes_written)
    }

    /// Finalize a multipart upload, returning its final path and size.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::NotFound`] for an unknown `upload_id`.
    pub async fn multipart_complete(
        &self,
        upload_id: &UploadId,
    ) -> Result<UploadedFile, HandlerError> {
        let mut multipart = self.multipart.lock().await;
        let Some(upload) = multipart.remove(upload_id) else {
            return Err(HandlerError::NotFound(format!(
                "unknown upload id {upload_id}"
            )));
        };
        Ok(UploadedFile {
            file_path: upload.file_path,
            bytes_written: upload.bytes_written,
        })
    }

    /// Abort a multipart upload, deleting its partial file.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::NotFound`] for an unknown `upload_id`.
    pub async fn multipart_abort(&self, upload_id: &UploadId) -> Result<(), HandlerError> {
        let mut multipart = self.multipart.lock().await;
        let Some(upload) = multipart.remove(upload_id) else {
            return Err(HandlerError::NotFound(format!(
                "unknown upload id {upload_id}"
            )));
        };
        drop(multipart);
        let _ = tokio::fs::remove_file(&upload.file_path).await;
        Ok(())
    }

    /// Delete a previously staged upload. Validates that both the lexical
    /// path and its canonical (post-symlink) resolution remain inside the
    /// session's upload directory.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Sandbox`] if either check fails, or
    /// [`HandlerError::NotFound`] if the session has no upload directory
    /// yet.
    pub async fn delete_upload(
        &self,
        session_key: &str,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        let dir = {
            let dirs = self.session_dirs.lock().await;
            dirs.get(session_key).cloned()
        };
        let Some(dir) = dir else {
            return Err(HandlerError::NotFound(format!(
                "no upload directory for session {session_key}"
            )));
        };

        let root = beacon_sandbox::WorkingRoot::new(dir)?;
        let resolved = beacon_sandbox::validate_realpath(Path::new(relative_path), &root)?;
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(HandlerError::Io)
    }

    /// Remove every session upload directory this registry created. Called
    /// on explicit session cleanup and on process exit.
    pub async fn cleanup_all(&self) {
        let dirs: Vec<PathBuf> = self.session_dirs.lock().await.values().cloned().collect();
        for dir in dirs {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
    }
}

/// Outcome of a completed (single-shot or multipart) upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Absolute path of the staged file.
    pub file_path: PathBuf,
    /// Total bytes written.
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_replaces_separators_and_dotdot() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_filename("a b\tc"), "a_b_c");
    }

    #[test]
    fn sanitize_empty_becomes_upload() {
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in ["../evil", "normal.txt", "  ", "a/b\\c..d"] {
            let once = sanitize_filename(name);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "not idempotent for {name:?}");
        }
    }

    #[test]
    fn sanitize_caps_at_255_chars() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 255);
    }

    #[tokio::test]
    async fn upload_file_writes_under_session_directory() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::new(dir.path().to_path_buf());
        let content = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let uploaded = registry
            .upload_file("session-1", "note.txt", &content)
            .await
            .unwrap();
        assert!(uploaded.file_path.starts_with(dir.path()));
        assert_eq!(uploaded.bytes_written, 5);
        assert!(tokio::fs::try_exists(&uploaded.file_path).await.unwrap());
    }

    #[tokio::test]
    async fn upload_file_rejects_oversized_content() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::new(dir.path().to_path_buf());
        let huge = "A".repeat((MAX_UPLOAD_BYTES as usize + 1024) * 4 / 3);
        let err = registry
            .upload_file("session-1", "big.bin", &huge)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn multipart_chunk_crossing_cap_deletes_partial_file() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::new(dir.path().to_path_buf());
        let upload_id = registry
            .multipart_start("session-1", "big.bin")
            .await
            .unwrap();

        let partial_path = {
            let multipart = registry.multipart.lock().await;
            multipart.get(&upload_id).unwrap().file_path.clone()
        };

        // Manually push bytes_written near the cap, then send a chunk that
        // crosses it.
        {
            let mut multipart = registry.multipart.lock().await;
            multipart.get_mut(&upload_id).unwrap().bytes_written = MAX_UPLOAD_BYTES - 2;
        }
        let chunk = base64::engine::general_purpose::STANDARD.encode(b"abcd");
        let err = registry.multipart_chunk(&upload_id, &chunk).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
        assert!(!tokio::fs::try_exists(&partial_path).await.unwrap());
        assert!(registry.multipart.lock().await.get(&upload_id).is_none());
    }

    #[tokio::test]
    async fn multipart_complete_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = UploadRegistry::new(dir.path().to_path_buf());
        let err = registry
            .multipart_complete(&UploadId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_upload_rejects_escape_via_symlink() {
        let blobs = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();

        let registry = UploadRegistry::new(blobs.path().to_path_buf());
        let content = base64::engine::general_purpose::STANDARD.encode(b"y");
        registry
            .upload_file("session-1", "real.txt", &content)
            .await
            .unwrap();

        let session_dir = {
            let dirs = registry.session_dirs.lock().await;
            dirs.get("session-1").unwrap().clone()
        };
        let link = session_dir.join("escape");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("secret"), &link).unwrap();

        #[cfg(unix)]
        {
            let err = registry
                .delete_upload("session-1", "escape")
                .await
                .unwrap_err();
            assert!(matches!(err, HandlerError::Sandbox(_)));
        }
    }
}
