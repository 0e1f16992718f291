//! Named partitions of the key space
//!
//! A [`Namespace`] owns a key prefix (`autocache:{name}:cache:`), a default
//! expiry and a handle to the store. Every wrapped function bound to the
//! namespace writes under that prefix, so [`Namespace::clear`] invalidates all
//! of them at once without touching other namespaces.

use crate::codec::KeyCodec;
use crate::config::NamespaceConfig;
use crate::error::{CacheError, Result};
use crate::key::{namespace_prefix, CacheKey, KeyFn, SEPARATOR};
use crate::stats::{CacheStats, StatsRecorder};
use crate::store::CacheStore;
use futures::TryStreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of a namespace lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Stored bytes for the key
    Hit(Vec<u8>),
    /// Nothing stored, or the entry expired
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// A named cache partition bound to a store
pub struct Namespace {
    config: NamespaceConfig,
    prefix: String,
    store: Arc<dyn CacheStore>,
    stats: StatsRecorder,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.config.name)
            .field("prefix", &self.prefix)
            .field("default_expiry", &self.config.default_expiry)
            .field("store", &self.store.backend_name())
            .finish()
    }
}

impl Namespace {
    /// Create a namespace with the given default expiry
    pub fn new(
        name: impl Into<String>,
        default_expiry: Duration,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        Self::with_config(NamespaceConfig::new(name, default_expiry), store)
    }

    /// Create a namespace from a full configuration
    pub fn with_config(config: NamespaceConfig, store: Arc<dyn CacheStore>) -> Result<Self> {
        config.validate()?;
        let prefix = namespace_prefix(&config.name);

        debug!(
            "Namespace {} bound to {} store (prefix {}, default expiry {:?})",
            config.name,
            store.backend_name(),
            prefix,
            config.default_expiry
        );

        Ok(Self {
            config,
            prefix,
            store,
            stats: StatsRecorder::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_expiry(&self) -> Duration {
        self.config.default_expiry
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Derive the key for one call
    ///
    /// With a key function, its output is digested instead of the arguments.
    /// Never touches the store.
    pub fn build_key<A: Serialize>(
        &self,
        function_identity: &str,
        args: &A,
        key_fn: Option<&KeyFn<A>>,
    ) -> Result<CacheKey> {
        let value = match key_fn {
            Some(key_fn) => key_fn.extract(args)?,
            None => KeyCodec::to_value(args)?,
        };
        self.key_for_value(function_identity, &value)
    }

    /// Derive a key from an already extracted key value
    pub(crate) fn key_for_value(
        &self,
        function_identity: &str,
        value: &serde_json::Value,
    ) -> Result<CacheKey> {
        let digest = KeyCodec::digest(value)?;
        Ok(CacheKey::new(&self.prefix, function_identity, digest))
    }

    /// Fetch the stored bytes for a key
    pub async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        let rendered = key.render();
        match self.store.get(&rendered).await? {
            Some(bytes) => {
                debug!("Cache hit: {}", rendered);
                Ok(Lookup::Hit(bytes))
            }
            None => {
                debug!("Cache miss: {}", rendered);
                Ok(Lookup::Miss)
            }
        }
    }

    /// Store bytes under a key
    ///
    /// Uses `expiry` when given, otherwise the namespace default (with jitter
    /// when configured). An explicit zero expiry is rejected.
    pub async fn put(&self, key: &CacheKey, value: Vec<u8>, expiry: Option<Duration>) -> Result<()> {
        let expiry = match expiry {
            Some(expiry) => {
                validate_expiry(expiry)?;
                expiry
            }
            None => self.expiry_for_write(),
        };

        self.store.set(&key.render(), value, expiry).await
    }

    /// Default expiry with jitter applied
    pub fn expiry_for_write(&self) -> Duration {
        self.config.ttl_with_jitter()
    }

    /// Delete every entry under this namespace's prefix
    ///
    /// Keys are collected from a prefix scan and deleted in batches. Entries
    /// written while the clear runs may survive it.
    pub async fn clear(&self) -> Result<usize> {
        let deleted = self.delete_under(&self.prefix).await?;
        info!("Cleared {} entries from namespace {}", deleted, self.config.name);
        Ok(deleted)
    }

    /// Delete every entry one function has stored in this namespace
    pub async fn clear_function(&self, function_identity: &str) -> Result<usize> {
        let prefix = format!("{}{}{}", self.prefix, function_identity, SEPARATOR);
        let deleted = self.delete_under(&prefix).await?;
        debug!("Cleared {} entries of {} in namespace {}", deleted, function_identity, self.config.name);
        Ok(deleted)
    }

    async fn delete_under(&self, prefix: &str) -> Result<usize> {
        self.store.clear_prefix(prefix).await
    }

    /// Keys currently stored in this namespace, with the prefix stripped
    pub async fn keys(&self) -> Result<Vec<String>> {
        let prefix = self.prefix.clone();
        self.store
            .scan_prefix(&self.prefix)
            .await?
            .map_ok(move |key| {
                key.strip_prefix(prefix.as_str())
                    .map(str::to_string)
                    .unwrap_or(key)
            })
            .try_collect()
            .await
    }

    /// Approximate bytes this namespace holds in the store
    ///
    /// Counts full key lengths plus stored value lengths.
    pub async fn memory_size(&self) -> Result<usize> {
        let keys: Vec<String> = self.store.scan_prefix(&self.prefix).await?.try_collect().await?;
        self.store.memory_size(&keys).await
    }

    /// Remove specific entries, returning how many existed
    pub async fn delete(&self, keys: &[CacheKey]) -> Result<usize> {
        let rendered: Vec<String> = keys.iter().map(CacheKey::render).collect();
        self.store.delete(&rendered).await
    }

    /// Snapshot of this namespace's counters
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn recorder(&self) -> &StatsRecorder {
        &self.stats
    }
}

/// Reject zero expiries given explicitly by a caller
pub(crate) fn validate_expiry(expiry: Duration) -> Result<()> {
    if expiry.is_zero() {
        return Err(CacheError::InvalidExpiry(
            "expiry must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
