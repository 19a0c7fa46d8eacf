use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::warn;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::storage::BlobStore;

/// Blob store rooted at a local directory; keys are relative paths below it.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a key to a path under the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        let all_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !all_normal {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent).await?;
        }

        // create_new makes the existence check and creation atomic
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.flush().await.map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        Ok(path.display().to_string())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob already absent on delete: {}", key);
                Ok(())
            }
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }
}
