use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use crate::utils::{P2PError, Result};

/// Local bytes behind the peer's file table. A published file lives in the
/// directory it was published from; a fetched file lands in `storage_dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    storage_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self { storage_dir }
    }

    pub async fn init(&self) -> Result<()> {
        async_fs::create_dir_all(&self.storage_dir).await.map_err(|e| {
            P2PError::StorageError(format!(
                "Failed to create storage directory {:?}: {}",
                self.storage_dir, e
            ))
        })?;

        info!("File store initialized at: {:?}", self.storage_dir);
        Ok(())
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Only a bare file name is accepted, so a remote cannot steer writes
    /// outside the storage directory.
    pub fn validate_name(file_name: &str) -> Result<()> {
        let path = Path::new(file_name);
        let is_bare = path.file_name().is_some_and(|n| n == path.as_os_str());
        if file_name.is_empty() || !is_bare || file_name == "." || file_name == ".." {
            return Err(P2PError::StorageError(format!(
                "Invalid file name: {:?}",
                file_name
            )));
        }
        Ok(())
    }

    pub async fn exists(location: &Path, file_name: &str) -> bool {
        async_fs::metadata(location.join(file_name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Size in bytes, or `None` when the file cannot be inspected.
    pub async fn size(location: &Path, file_name: &str) -> Option<u64> {
        async_fs::metadata(location.join(file_name))
            .await
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    pub async fn read(location: &Path, file_name: &str) -> Result<Vec<u8>> {
        let path = location.join(file_name);
        let data = async_fs::read(&path)
            .await
            .map_err(|e| P2PError::StorageError(format!("Failed to read {:?}: {}", path, e)))?;

        debug!("Read {:?} ({} bytes)", path, data.len());
        Ok(data)
    }

    /// Write a fetched file into the storage directory. Bytes go to a
    /// `.part` file first and are renamed into place, so a failed write never
    /// touches an existing file of the same name.
    pub async fn save(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf> {
        Self::validate_name(file_name)?;
        let path = self.storage_dir.join(file_name);
        let partial = self.storage_dir.join(format!(".{}.part", file_name));

        if let Err(e) = Self::write_file(&partial, contents).await {
            let _ = async_fs::remove_file(&partial).await;
            return Err(e);
        }
        if let Err(e) = async_fs::rename(&partial, &path).await {
            let _ = async_fs::remove_file(&partial).await;
            return Err(P2PError::StorageError(format!(
                "Failed to move {:?} into place: {}",
                path, e
            )));
        }

        info!("Saved {:?} ({} bytes)", path, contents.len());
        Ok(path)
    }

    async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = async_fs::File::create(path)
            .await
            .map_err(|e| P2PError::StorageError(format!("Failed to create {:?}: {}", path, e)))?;

        file.write_all(contents)
            .await
            .map_err(|e| P2PError::StorageError(format!("Failed to write {:?}: {}", path, e)))?;

        file.flush()
            .await
            .map_err(|e| P2PError::StorageError(format!("Failed to flush {:?}: {}", path, e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        store.init().await.unwrap();

        let path = store.save("a.txt", b"contents").await.unwrap();
        assert_eq!(path, dir.path().join("nested").join("a.txt"));
        assert!(FileStore::exists(store.storage_dir(), "a.txt").await);
        assert_eq!(
            FileStore::read(store.storage_dir(), "a.txt").await.unwrap(),
            b"contents"
        );
    }

    #[tokio::test]
    async fn test_failed_save_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        tokio::fs::write(dir.path().join("keep.txt"), b"original")
            .await
            .unwrap();
        // A directory squatting on the staging name makes the write fail.
        tokio::fs::create_dir(dir.path().join(".keep.txt.part"))
            .await
            .unwrap();

        let err = store.save("keep.txt", b"replacement").await.unwrap_err();
        assert!(matches!(err, P2PError::StorageError(_)));
        assert_eq!(
            FileStore::read(dir.path(), "keep.txt").await.unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        tokio::fs::write(dir.path().join("a.txt"), b"old").await.unwrap();

        store.save("a.txt", b"new contents").await.unwrap();
        assert_eq!(
            FileStore::read(dir.path(), "a.txt").await.unwrap(),
            b"new contents"
        );
        assert!(!dir.path().join(".a.txt.part").exists());
        assert_eq!(FileStore::size(dir.path(), "a.txt").await, Some(12));
        assert_eq!(FileStore::size(dir.path(), "missing").await, None);
    }

    #[tokio::test]
    async fn test_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStore::read(dir.path(), "nope.txt").await.unwrap_err();
        assert!(matches!(err, P2PError::StorageError(_)));
        assert!(!FileStore::exists(dir.path(), "nope.txt").await);
    }

    #[tokio::test]
    async fn test_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        for bad in ["", "..", "../escape.txt", "sub/file.txt", "/etc/passwd"] {
            assert!(
                matches!(store.save(bad, b"x").await, Err(P2PError::StorageError(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
