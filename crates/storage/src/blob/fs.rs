use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{BlobError, BlobStore, StoredBlob, content_type_for};

/// Directory under the root where writes land before being renamed into place.
const STAGING_DIR: &str = ".staging";

/// Blob store rooted at a local directory; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::Io` if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let invalid = |reason| BlobError::InvalidKey {
            key: key.to_owned(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(invalid("keys are relative and '/'-separated"));
        }
        if key.split('/').next() == Some(STAGING_DIR) {
            return Err(invalid("reserved for in-flight writes"));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." | ".." => return Err(invalid("relative path segment")),
                s => path.push(s),
            }
        }
        Ok(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Remove now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(d).await.is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.root.join(STAGING_DIR).join(uuid_suffix());
        tokio::fs::write(&staging, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredBlob, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(StoredBlob {
                bytes: Bytes::from(data),
                content_type: content_type_for(key).to_owned(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(key.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        // Start at the deepest directory the prefix fully names.
        let start = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => self.path_for(dir)?,
            _ => self.root.clone(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if path != self.root.join(STAGING_DIR) {
                        pending.push(path);
                    }
                    continue;
                }
                match self.key_for(&path) {
                    Some(key) if key.starts_with(prefix) => keys.push(key),
                    _ => {}
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (_dir, store) = store().await;
        store
            .put(
                "course-content/1/notes.pdf",
                Bytes::from_static(b"%PDF"),
                "application/pdf",
            )
            .await
            .unwrap();

        let blob = store.get("course-content/1/notes.pdf").await.unwrap();
        assert_eq!(blob.bytes, Bytes::from_static(b"%PDF"));
        assert_eq!(blob.content_type, "application/pdf");

        store.delete("course-content/1/notes.pdf").await.unwrap();
        assert!(matches!(
            store.get("course-content/1/notes.pdf").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
        assert!(!store.root().join("course-content").exists());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let (_dir, store) = store().await;
        for key in ["../outside", "/etc/passwd", "a//b", "a/./b", "", ".staging/x"] {
            let err = store
                .put(key, Bytes::from_static(b"x"), "text/plain")
                .await
                .unwrap_err();
            assert!(
                matches!(err, BlobError::InvalidKey { .. }),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn delete_prefix_removes_a_video_folder() {
        let (_dir, store) = store().await;
        for key in [
            "videos/1/s/100-a/master.m3u8",
            "videos/1/s/100-a/seg_000.ts",
            "videos/1/s/100-a/seg_001.ts",
            "videos/1/s/200-b/master.m3u8",
        ] {
            store
                .put(key, Bytes::from_static(b"x"), "video/mp2t")
                .await
                .unwrap();
        }

        assert_eq!(store.delete_prefix("videos/1/s/100-a/").await.unwrap(), 3);
        assert_eq!(
            store.list_prefix("videos/").await.unwrap(),
            vec!["videos/1/s/200-b/master.m3u8"]
        );
        assert_eq!(store.list_prefix("videos/9/").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn listing_skips_in_flight_writes_but_not_partial_names() {
        let (_dir, store) = store().await;
        store
            .put(
                "course-content/1/draft.partial",
                Bytes::from_static(b"x"),
                "application/octet-stream",
            )
            .await
            .unwrap();
        tokio::fs::write(store.root().join(STAGING_DIR).join("leftover"), b"y")
            .await
            .unwrap();

        assert_eq!(
            store.list_prefix("").await.unwrap(),
            vec!["course-content/1/draft.partial"]
        );
        assert_eq!(
            store.list_prefix("course-content/").await.unwrap(),
            vec!["course-content/1/draft.partial"]
        );
    }
}
