//! Object storage for course media: transcoded video folders, PDFs and
//! course images.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("blob backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stored object as returned by `BlobStore::get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Key/value object store addressed by `/`-separated keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing anything already there.
    ///
    /// # Errors
    ///
    /// Returns `BlobError` if the key is invalid or the backend fails.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), BlobError>;

    /// Read an object.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::NotFound` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<StoredBlob, BlobError>;

    /// Delete one object. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `BlobError` if the backend fails.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Every key starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `BlobError` if the backend fails.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Delete every object under `prefix`. Returns how many were deleted.
    ///
    /// Stops at the first failing delete.
    ///
    /// # Errors
    ///
    /// Returns `BlobError` if listing or any delete fails.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError> {
        if prefix.is_empty() {
            return Err(BlobError::InvalidKey {
                key: String::new(),
                reason: "refusing to delete an empty prefix",
            });
        }
        let keys = self.list_prefix(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        tracing::debug!(prefix, deleted = keys.len(), "deleted blob prefix");
        Ok(keys.len())
    }
}

/// MIME type for a stored media file, by extension.
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "mpd" => "application/dash+xml",
        "ts" => "video/mp2t",
        "m4s" => "video/iso.segment",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
