//! Key-value stores backing the cache
//!
//! Every backend implements [`CacheStore`]: byte values under string keys,
//! per-entry expiry, deletion and lazy enumeration by key prefix.
//!
//! - [`MemoryStore`]: in-process map, for tests and single-process use
//! - [`RedisStore`]: shared Redis server
//! - [`FileStore`]: one file per entry in a directory
//! - [`DispatchStore`]: primary store plus alternates that see deletes and clears

mod dispatch;
mod entry;
mod file;
mod health;
mod memory;
mod redis;

pub use dispatch::DispatchStore;
pub use entry::CacheEntry;
pub use file::FileStore;
pub use health::{HealthStatus, StoreHealth, DEFAULT_DEGRADED_THRESHOLD_MS};
pub use memory::{start_auto_cleanup, MemoryStore};
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Lazily produced store keys
pub type KeyStream = BoxStream<'static, Result<String>>;

/// Keys deleted per store round trip by [`CacheStore::clear_prefix`]
pub const CLEAR_BATCH_SIZE: usize = 500;

/// Probe key used by the default health check
pub(crate) const HEALTH_PROBE_KEY: &str = "autocache:__health__";

/// Storage backend interface
///
/// Implementations must be safe to share between tasks. Expired entries are
/// never returned from [`get`](CacheStore::get).
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>, expiry: Duration) -> Result<()>;

    /// Remove keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Enumerate keys starting with `prefix`
    ///
    /// The stream may yield keys that expire or are deleted before the caller
    /// gets to them.
    async fn scan_prefix(&self, prefix: &str) -> Result<KeyStream>;

    /// Delete every key starting with `prefix`, returning how many existed
    ///
    /// Keys come from [`scan_prefix`](CacheStore::scan_prefix) and are deleted
    /// in batches of [`CLEAR_BATCH_SIZE`].
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let mut keys = self.scan_prefix(prefix).await?;
        let mut batch = Vec::with_capacity(CLEAR_BATCH_SIZE);
        let mut deleted = 0;

        while let Some(key) = keys.try_next().await? {
            batch.push(key);
            if batch.len() >= CLEAR_BATCH_SIZE {
                deleted += self.delete(&batch).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            deleted += self.delete(&batch).await?;
        }
        Ok(deleted)
    }

    /// Approximate bytes held by `keys`: key lengths plus stored value lengths
    ///
    /// Keys that are missing or expired count nothing.
    async fn memory_size(&self, keys: &[String]) -> Result<usize> {
        let mut total = 0;
        for key in keys {
            if let Some(value) = self.get(key).await? {
                total += key.len() + value.len();
            }
        }
        Ok(total)
    }

    /// Probe the store
    async fn health_check(&self) -> StoreHealth {
        let start = Instant::now();
        match self.get(HEALTH_PROBE_KEY).await {
            Ok(_) => StoreHealth::healthy(
                self.backend_name(),
                start.elapsed(),
                DEFAULT_DEGRADED_THRESHOLD_MS,
            ),
            Err(e) => StoreHealth::unhealthy(self.backend_name(), start.elapsed(), e),
        }
    }

    /// Short backend name for logs and health reports
    fn backend_name(&self) -> &'static str;
}
