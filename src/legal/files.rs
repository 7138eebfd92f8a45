//! On-disk store for documents uploaded into a case.
//!
//! Layout is `<root>/<case_id>/<stored_name>`. Stored names are always the
//! output of [`sanitize_filename`], and every path handed to the filesystem
//! is checked to be a strict descendant of its case directory.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use uuid::Uuid;

use crate::error::FileStoreError;
use crate::legal::case::CaseId;
use crate::legal::policy::{content_type_for, sanitize_filename};

/// Maximum number of files accepted by one upload request.
pub const MAX_UPLOAD_FILES: usize = 20;
/// Maximum size of a single uploaded file (50 MiB).
pub const MAX_UPLOAD_FILE_BYTES: usize = 50 * 1024 * 1024;

const STAGING_PREFIX: &str = ".staging-";

/// A file part received from the client, held in memory until committed.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl PendingUpload {
    /// Name reported back to the client: the part filename, else the field name.
    fn display_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.field_name)
    }
}

/// Metadata for a committed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub case_id: CaseId,
    pub original_name: String,
    pub stored_name: String,
    pub size: usize,
    pub mime_type: String,
}

/// A stored file read back for serving.
#[derive(Debug, Clone)]
pub struct CaseFile {
    pub stored_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

/// Per-case document storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create, if needed) the uploads root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let root = root.as_ref();
        let absolute = std::path::absolute(root).map_err(|e| FileStoreError::io(root, e))?;
        let root = normalize_lexically(&absolute);
        std::fs::create_dir_all(&root).map_err(|e| FileStoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn case_dir(&self, case_id: &CaseId) -> PathBuf {
        self.root.join(case_id.as_str())
    }

    /// Resolve a stored name inside the case directory.
    ///
    /// The name is re-sanitized, then the joined path is resolved lexically
    /// and must land strictly inside the case directory. Resolving to the
    /// case directory itself (`.`) is rejected as well as escaping it.
    pub fn resolve(&self, case_id: &CaseId, stored_name: &str) -> Result<PathBuf, FileStoreError> {
        let safe = sanitize_filename(stored_name);
        let case_dir = normalize_lexically(&self.case_dir(case_id));
        let resolved = normalize_lexically(&case_dir.join(&safe));
        if !resolved.starts_with(&case_dir) || resolved == case_dir {
            tracing::warn!(case_id = %case_id, stored_name, "Rejected path outside case directory");
            return Err(FileStoreError::InvalidPath);
        }
        Ok(resolved)
    }

    /// Write every upload into the case directory, all or nothing.
    ///
    /// Files are first written under a per-request staging directory and
    /// only renamed onto their final names once every write succeeded. On
    /// failure the staging directory is removed and no existing file is
    /// replaced.
    pub async fn store_all(
        &self,
        case_id: &CaseId,
        uploads: Vec<PendingUpload>,
    ) -> Result<Vec<StoredFile>, FileStoreError> {
        // Resolve every target before touching the disk.
        let mut planned = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let stored_name = sanitize_filename(upload.display_name());
            let target = self.resolve(case_id, &stored_name)?;
            planned.push((upload, stored_name, target));
        }

        let case_dir = self.case_dir(case_id);
        tokio::fs::create_dir_all(&case_dir)
            .await
            .map_err(|e| FileStoreError::io(&case_dir, e))?;
        if planned.is_empty() {
            return Ok(Vec::new());
        }

        let staging = case_dir.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| FileStoreError::io(&staging, e))?;

        let result = self.commit(case_id, &staging, planned).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), "Failed to remove upload staging dir: {}", e);
            }
        }
        result
    }

    async fn commit(
        &self,
        case_id: &CaseId,
        staging: &Path,
        planned: Vec<(PendingUpload, String, PathBuf)>,
    ) -> Result<Vec<StoredFile>, FileStoreError> {
        let mut stored = Vec::with_capacity(planned.len());
        let mut staged = Vec::with_capacity(planned.len());

        for (upload, stored_name, target) in planned {
            let staged_path = staging.join(&stored_name);
            tokio::fs::write(&staged_path, &upload.data)
                .await
                .map_err(|e| {
                    tracing::error!(case_id = %case_id, path = %staged_path.display(), "Upload write failed: {}", e);
                    FileStoreError::io(&staged_path, e)
                })?;
            stored.push(StoredFile {
                case_id: case_id.clone(),
                original_name: upload.display_name().to_string(),
                stored_name,
                size: upload.data.len(),
                mime_type: upload.content_type.clone().unwrap_or_default(),
            });
            staged.push((staged_path, target));
        }

        // A repeated name overwrote its staged copy, so each target is renamed once.
        let mut renamed = HashSet::new();
        for (staged_path, target) in staged {
            if !renamed.insert(target.clone()) {
                continue;
            }
            tokio::fs::rename(&staged_path, &target)
                .await
                .map_err(|e| FileStoreError::io(&target, e))?;
        }

        tracing::info!(case_id = %case_id, files = stored.len(), "Stored case uploads");
        Ok(stored)
    }

    /// Read a stored file for inline serving.
    pub async fn read(&self, case_id: &CaseId, stored_name: &str) -> Result<CaseFile, FileStoreError> {
        if stored_name.is_empty() {
            return Err(FileStoreError::InvalidPath);
        }
        let path = self.resolve(case_id, stored_name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(FileStoreError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound);
            }
            Err(e) => return Err(FileStoreError::io(&path, e)),
        }
        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileStoreError::NotFound,
            _ => FileStoreError::io(&path, e),
        })?;
        let stored_name = sanitize_filename(stored_name);
        Ok(CaseFile {
            content_type: content_type_for(&stored_name),
            stored_name,
            data,
        })
    }
}

/// Resolve `.` and `..` without touching the filesystem (no symlink lookup).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
