//! Opaque blob storage for uploaded document bytes.

pub mod filesystem;

use async_trait::async_trait;

use crate::error::StorageError;

pub use filesystem::FilesystemBlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `content` under `key` and returns a human-readable location.
    async fn put(&self, key: &str, content: &[u8]) -> Result<String, StorageError>;

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Key for a new upload: `documents/{owner}/{unique}{.ext}`.
///
/// The owner segment keeps only ASCII alphanumerics, `-` and `_`, and the
/// extension is taken from the original file name, lowercased.
pub fn blob_key(owner: &str, original_file_name: &str) -> String {
    let owner_segment: String = owner
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let extension = std::path::Path::new(original_file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "documents/{}/{}{}",
        owner_segment,
        uuid::Uuid::new_v4().simple(),
        extension
    )
}
