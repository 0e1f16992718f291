//! In-process store

use super::{CacheEntry, CacheStore, KeyStream};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory store with per-entry expiry
///
/// Expired entries are dropped when read. Call [`cleanup_expired`](Self::cleanup_expired)
/// or run [`start_auto_cleanup`] to reclaim entries nobody reads again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Cleaned up {} expired entries", removed);
        }
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless it was replaced in the meantime
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
            debug!("Entry expired: {}", key);
        }
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, value, expiry);
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.entries.write().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| !entry.is_expired())
            .count())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<KeyStream> {
        let keys: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
                .map(|(key, _)| key.clone())
                .collect()
        };
        Ok(stream::iter(keys.into_iter().map(Ok)).boxed())
    }

    async fn memory_size(&self, keys: &[String]) -> Result<usize> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key))
            .filter(|entry| !entry.is_expired())
            .map(CacheEntry::size_bytes)
            .sum())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Background task that periodically drops expired entries
pub async fn start_auto_cleanup(store: Arc<MemoryStore>, interval: Duration) {
    info!("Starting automatic store cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let removed = store.cleanup_expired().await;
        if removed > 0 {
            debug!("Auto cleanup: {} expired entries", removed);
        }
    }
}
