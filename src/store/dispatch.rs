//! Primary/alternate store fan-out

use super::{CacheStore, KeyStream, StoreHealth};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Routes reads and writes to a primary store and deletes to every store
///
/// Alternates only ever see deletions and prefix clears, so an entry
/// invalidated through the dispatcher is gone from every backend that might
/// still hold a copy. Key enumeration reads the primary only.
#[derive(Debug, Clone)]
pub struct DispatchStore {
    stores: Vec<Arc<dyn CacheStore>>,
}

impl DispatchStore {
    /// The first store is the primary. At least one store is required.
    pub fn new(stores: Vec<Arc<dyn CacheStore>>) -> Result<Self> {
        if stores.is_empty() {
            return Err(CacheError::Config(
                "dispatch store needs at least one store".to_string(),
            ));
        }
        Ok(Self { stores })
    }

    pub fn primary(&self) -> &Arc<dyn CacheStore> {
        &self.stores[0]
    }

    pub fn stores(&self) -> &[Arc<dyn CacheStore>] {
        &self.stores
    }
}

#[async_trait]
impl CacheStore for DispatchStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.primary().get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Duration) -> Result<()> {
        self.primary().set(key, value, expiry).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let primary = self.primary().delete(keys).await?;

        for store in &self.stores[1..] {
            if let Err(e) = store.delete(keys).await {
                warn!(
                    "Delete on alternate {} store failed: {}",
                    store.backend_name(),
                    e
                );
                return Err(e);
            }
        }

        Ok(primary)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<KeyStream> {
        self.primary().scan_prefix(prefix).await
    }

    /// Clears every store, summing what each removed
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let mut deleted = 0;
        for store in &self.stores {
            deleted += store.clear_prefix(prefix).await?;
        }
        Ok(deleted)
    }

    async fn memory_size(&self, keys: &[String]) -> Result<usize> {
        self.primary().memory_size(keys).await
    }

    async fn health_check(&self) -> StoreHealth {
        self.primary().health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "dispatch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_empty_dispatch_rejected() {
        assert!(matches!(
            DispatchStore::new(Vec::new()),
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_go_to_primary_only() {
        let primary = Arc::new(MemoryStore::new());
        let alternate = Arc::new(MemoryStore::new());
        let store = DispatchStore::new(vec![primary.clone() as Arc<dyn CacheStore>, alternate.clone()]).unwrap();

        store.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(primary.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(alternate.get("k").await.unwrap(), None);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_fans_out() {
        let primary = Arc::new(MemoryStore::new());
        let alternate = Arc::new(MemoryStore::new());
        alternate.set("k", b"stale".to_vec(), Duration::from_secs(60)).await.unwrap();
        let store = DispatchStore::new(vec![primary.clone() as Arc<dyn CacheStore>, alternate.clone()]).unwrap();

        store.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        let removed = store.delete(&["k".to_string()]).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(primary.get("k").await.unwrap(), None);
        assert_eq!(alternate.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_prefix_reaches_alternates() {
        let primary = Arc::new(MemoryStore::new());
        let alternate = Arc::new(MemoryStore::new());
        let store = DispatchStore::new(vec![primary.clone() as Arc<dyn CacheStore>, alternate.clone()]).unwrap();

        store.set("ns:fresh", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        alternate.set("ns:stale", b"x".to_vec(), Duration::from_secs(60)).await.unwrap();
        alternate.set("other:kept", b"k".to_vec(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.clear_prefix("ns:").await.unwrap(), 2);
        assert_eq!(primary.get("ns:fresh").await.unwrap(), None);
        assert_eq!(alternate.get("ns:stale").await.unwrap(), None);
        assert_eq!(alternate.get("other:kept").await.unwrap(), Some(b"k".to_vec()));
    }
}
