//! Object storage for rendered artifacts.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ForgeError, Result};

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key` and return the public address.
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<String>;
}

/// Content-addressed key for a part artifact.
///
/// A re-render of the same part gets a fresh key whenever the bytes differ,
/// so a committed edit never overwrites the address it replaces.
pub fn artifact_key(document_id: Uuid, sequence: u32, bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    format!("documents/{document_id}/parts/{sequence:03}-{}.pdf", &digest[..12])
}

/// Filesystem-backed storage. Objects are staged in a temporary file next to
/// their final location and renamed into place.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<String> {
        if key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(ForgeError::StorageUpload {
                key: key.to_string(),
                message: "invalid object key".to_string(),
            });
        }
        let path = self.root.join(key);
        let len = bytes.len();

        tokio::task::spawn_blocking(move || Self::write(&path, &bytes))
            .await
            .map_err(|e| ForgeError::StorageUpload {
                key: key.to_string(),
                message: format!("upload task failed: {e}"),
            })?
            .map_err(|e| ForgeError::StorageUpload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        log::info!("Stored {key} ({len} bytes, {content_type})");
        Ok(format!("{}/{key}", self.public_base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_content_addressed() {
        let id = Uuid::new_v4();
        let a = artifact_key(id, 3, b"one");
        let b = artifact_key(id, 3, b"two");
        assert_ne!(a, b);
        assert_eq!(a, artifact_key(id, 3, b"one"));
        assert!(a.starts_with(&format!("documents/{id}/parts/003-")));
        assert!(a.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn put_writes_file_and_returns_address() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "https://cdn.example.com/");
        let url = store
            .put(b"%PDF-1.7".to_vec(), "documents/x/parts/001-abc.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/documents/x/parts/001-abc.pdf");
        let written = std::fs::read(dir.path().join("documents/x/parts/001-abc.pdf")).unwrap();
        assert_eq!(written, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "file://x");
        let err = store
            .put(Vec::new(), "../escape.pdf", "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::StorageUpload { .. }));
        assert!(!err.is_retryable());
    }
}
