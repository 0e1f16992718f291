//! Local file store
//!
//! Each key lives in its own `<sha256(key)>.json` file under the root directory,
//! holding a serialized [`CacheEntry`]. Writes go through a temporary file and a
//! rename, so readers never see a partially written entry.

use super::{CacheEntry, CacheStore, KeyStream};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";

/// Store keeping one JSON file per entry
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Use `root` as the cache directory, creating it if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            CacheError::Io(format!("cannot create cache directory {:?}: {}", root, e))
        })?;
        debug!("File store rooted at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.root
            .join(format!("{}.{}", hex::encode(hasher.finalize()), ENTRY_EXTENSION))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Io(format!("corrupt cache file {:?}: {}", path, e)))
    }

    async fn remove_file(path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let Some(entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };

        // Digest collision
        if entry.key != key {
            return Ok(None);
        }

        if entry.is_expired() {
            debug!("Entry expired: {}", key);
            Self::remove_file(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Duration) -> Result<()> {
        let path = self.entry_path(key);
        let entry = CacheEntry::new(key, value, expiry);
        let bytes = serde_json::to_vec(&entry).map_err(|e| CacheError::Encode(e.to_string()))?;

        let tmp = path.with_extension(format!("tmp-{:016x}", rand::random::<u64>()));
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if Self::remove_file(&self.entry_path(key)).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<KeyStream> {
        let dir = fs::read_dir(&self.root).await?;
        let prefix = prefix.to_string();

        let paths = stream::try_unfold(dir, |mut dir| async move {
            match dir.next_entry().await? {
                Some(entry) => Ok::<_, CacheError>(Some((entry.path(), dir))),
                None => Ok(None),
            }
        });

        let keys = paths
            .try_filter_map(move |path| {
                let prefix = prefix.clone();
                async move {
                    if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                        return Ok(None);
                    }
                    match Self::read_entry(&path).await {
                        Ok(Some(entry)) if !entry.is_expired() && entry.key.starts_with(&prefix) => {
                            Ok(Some(entry.key))
                        }
                        Ok(_) => Ok(None),
                        // Removed between listing and reading, or unreadable
                        Err(e) => {
                            warn!("Skipping cache file {:?}: {}", path, e);
                            Ok(None)
                        }
                    }
                }
            })
            .boxed();

        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store
            .set("autocache:ns:cache:f:1", b"[1]".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("autocache:ns:cache:f:1").await.unwrap(),
            Some(b"[1]".to_vec())
        );
        assert_eq!(store.get("autocache:ns:cache:f:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_expiry_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.set("k", b"v".to_vec(), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.entry_path("k").exists());
    }

    #[tokio::test]
    async fn test_file_scan_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested")).await.unwrap();

        for key in ["a:1", "a:2", "b:1"] {
            store.set(key, Vec::new(), Duration::from_secs(60)).await.unwrap();
        }
        std::fs::write(dir.path().join("nested").join("garbage.json"), b"not json").unwrap();

        let mut keys: Vec<String> = store
            .scan_prefix("a:")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a:1".to_string(), "a:2".to_string()]);

        let removed = store.delete(&keys).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get("a:1").await.unwrap(), None);
        assert!(store.get("b:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        std::fs::write(store.entry_path("k"), b"{").unwrap();

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_store_failure());
    }
}
