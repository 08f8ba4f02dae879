use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{BlobError, BlobStore, StoredBlob};

/// In-memory blob store for tests and local prototyping.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    objects: Arc<Mutex<BTreeMap<String, StoredBlob>>>,
}

impl InMemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().map(|g| g.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|g| g.contains_key(key))
            .unwrap_or(false)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> BlobError {
    BlobError::Backend(e.to_string())
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), BlobError> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey {
                key: String::new(),
                reason: "empty key",
            });
        }
        let mut guard = self.objects.lock().map_err(poisoned)?;
        guard.insert(
            key.to_owned(),
            StoredBlob {
                bytes,
                content_type: content_type.to_owned(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredBlob, BlobError> {
        let guard = self.objects.lock().map_err(poisoned)?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_owned()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let mut guard = self.objects.lock().map_err(poisoned)?;
        guard.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let guard = self.objects.lock().map_err(poisoned)?;
        Ok(guard
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_and_delete_prefix_only_touch_the_folder() {
        let store = InMemoryBlobStore::new();
        for key in [
            "videos/1/a/master.m3u8",
            "videos/1/a/seg_000.ts",
            "videos/1/ab/master.m3u8",
            "videos/2/a/master.m3u8",
        ] {
            store
                .put(key, Bytes::from_static(b"x"), "video/mp2t")
                .await
                .unwrap();
        }

        let listed = store.list_prefix("videos/1/a/").await.unwrap();
        assert_eq!(listed, vec!["videos/1/a/master.m3u8", "videos/1/a/seg_000.ts"]);

        assert_eq!(store.delete_prefix("videos/1/a/").await.unwrap(), 2);
        assert_eq!(
            store.keys(),
            vec!["videos/1/ab/master.m3u8", "videos/2/a/master.m3u8"]
        );
    }

    #[tokio::test]
    async fn get_missing_is_not_found_and_delete_missing_is_ok() {
        let store = InMemoryBlobStore::new();
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
        store.delete("nope").await.unwrap();
    }
}
