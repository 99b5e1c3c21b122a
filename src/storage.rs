//! Local document storage for uploads.
//!
//! Uploaded bytes are written under a base directory as
//! `<file_id>_<original name>`, so two uploads of `scan.png` never collide
//! and the original name stays visible on disk.

use crate::error::ServiceError;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where an upload ended up and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub path: PathBuf,
    /// The sanitised original file name.
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Filesystem directory holding uploaded documents.
#[derive(Debug, Clone)]
pub struct DocumentStorage {
    base_dir: PathBuf,
}

impl DocumentStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `bytes` for `file_id`, creating the directory if needed.
    ///
    /// The write goes to a `.part` file first and is renamed into place, so a
    /// crash never leaves a truncated document under its final name.
    pub async fn store_bytes(
        &self,
        bytes: &[u8],
        original_name: &str,
        file_id: Uuid,
    ) -> Result<StoredDocument, ServiceError> {
        let name = sanitize_file_name(original_name);
        let path = self.base_dir.join(format!("{file_id}_{name}"));
        let write_err = |source| ServiceError::StorageWriteFailed {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.base_dir).await.map_err(write_err)?;

        let tmp_path = path.with_extension("part");
        tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;

        let mime_type = guess_mime(Path::new(&name));
        Ok(StoredDocument {
            path,
            name,
            mime_type,
            size: bytes.len() as u64,
        })
    }
}

/// Keep only the final path component and replace anything that is not
/// portable in a file name.
fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// MIME type from the file extension. Unknown extensions are
/// `application/octet-stream`.
pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_reduced_to_a_safe_basename() {
        assert_eq!(sanitize_file_name("scan.png"), "scan.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\scans\\my form.tiff"), "my_form.tiff");
        assert_eq!(sanitize_file_name(".."), "document");
        assert_eq!(sanitize_file_name(""), "document");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime(Path::new("a.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("scan.tiff")), "image/tiff");
        assert_eq!(guess_mime(Path::new("scan.bmp")), "image/bmp");
        assert_eq!(guess_mime(Path::new("a")), "application/octet-stream");
        assert_eq!(guess_mime(Path::new("a.unknownext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn store_writes_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DocumentStorage::new(dir.path().join("uploads"));
        let id = Uuid::new_v4();

        let stored = storage.store_bytes(b"\x89PNG", "receipt.png", id).await.unwrap();

        assert_eq!(stored.path, dir.path().join("uploads").join(format!("{id}_receipt.png")));
        assert_eq!(stored.mime_type, "image/png");
        assert_eq!(stored.size, 4);
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"\x89PNG");
        assert!(!stored.path.with_extension("part").exists());
    }
}
