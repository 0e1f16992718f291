//! Shared namespaces
//!
//! A [`Registry`] hands out one [`Namespace`] per name, all bound to the
//! registry's store, so every function memoized under the same name shares one
//! prefix and one connection. The first registration of a name fixes its default
//! expiry.
//!
//! The process-wide registry behind [`global`], [`get_namespace`] and [`memoize`]
//! uses a [`MemoryStore`] unless [`install_global`] was called first.

use crate::config::{NamespaceConfig, StoreConfig};
use crate::error::{CacheError, Result};
use crate::key::KeyFn;
use crate::memoize::Memoized;
use crate::namespace::Namespace;
use crate::store::{CacheStore, MemoryStore};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Name to namespace map bound to one store
pub struct Registry {
    store: Arc<dyn CacheStore>,
    namespaces: DashMap<String, Arc<Namespace>>,
    creation: Mutex<()>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("store", &self.store.backend_name())
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

impl Registry {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            namespaces: DashMap::new(),
            creation: Mutex::new(()),
        }
    }

    /// Open the configured store and build a registry over it
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(config.connect().await?))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Shared namespace for `name`, created with `default_expiry` on first request
    ///
    /// Later requests get the existing namespace even when they ask for a
    /// different expiry.
    pub fn get_or_create(&self, name: &str, default_expiry: Duration) -> Result<Arc<Namespace>> {
        self.get_or_create_with(NamespaceConfig::new(name, default_expiry))
    }

    /// Like [`get_or_create`](Self::get_or_create) with a full namespace configuration
    pub fn get_or_create_with(&self, config: NamespaceConfig) -> Result<Arc<Namespace>> {
        if let Some(existing) = self.lookup(&config) {
            return Ok(existing);
        }

        let _guard = self
            .creation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = self.lookup(&config) {
            return Ok(existing);
        }

        let name = config.name.clone();
        let namespace = Arc::new(Namespace::with_config(config, Arc::clone(&self.store))?);
        self.namespaces.insert(name.clone(), Arc::clone(&namespace));

        info!(
            "Created namespace {} (default expiry {:?})",
            name,
            namespace.default_expiry()
        );
        Ok(namespace)
    }

    fn lookup(&self, config: &NamespaceConfig) -> Option<Arc<Namespace>> {
        let existing = self.namespaces.get(&config.name)?;
        if existing.default_expiry() != config.default_expiry {
            warn!(
                "Namespace {} already registered with default expiry {:?}; ignoring {:?}",
                config.name,
                existing.default_expiry(),
                config.default_expiry
            );
        }
        Some(Arc::clone(existing.value()))
    }

    /// Existing namespace, if registered
    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of all registered namespaces
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Memoize `f` in the namespace `name`
    pub fn memoize<A, R, E, F, Fut>(
        &self,
        name: &str,
        default_expiry: Duration,
        identity: impl Into<String>,
        f: F,
    ) -> Result<Memoized<A, R, E>>
    where
        A: Serialize + 'static,
        R: 'static,
        E: 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let namespace = self.get_or_create(name, default_expiry)?;
        Ok(Memoized::new(namespace, identity, f))
    }

    /// Memoize `f` in the namespace `name`, keying calls by `key_fn`
    ///
    /// The arguments do not need to be serializable.
    pub fn memoize_keyed<A, R, E, F, Fut>(
        &self,
        name: &str,
        default_expiry: Duration,
        identity: impl Into<String>,
        key_fn: KeyFn<A>,
        f: F,
    ) -> Result<Memoized<A, R, E>>
    where
        A: 'static,
        R: 'static,
        E: 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let namespace = self.get_or_create(name, default_expiry)?;
        Ok(Memoized::keyed(namespace, identity, key_fn, f))
    }
}

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// Process-wide registry
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        info!("Initializing global registry with in-memory store");
        Registry::new(Arc::new(MemoryStore::new()))
    })
}

/// Bind the process-wide registry to `store`
///
/// Fails if the global registry is already in use.
pub fn install_global(store: Arc<dyn CacheStore>) -> Result<&'static Registry> {
    let backend = store.backend_name();
    GLOBAL.set(Registry::new(store)).map_err(|_| {
        CacheError::Config("global registry is already initialized".to_string())
    })?;
    info!("Installed global registry with {} store", backend);
    Ok(global())
}

/// Shared namespace from the global registry
pub fn get_namespace(name: &str, default_expiry: Duration) -> Result<Arc<Namespace>> {
    global().get_or_create(name, default_expiry)
}

/// Memoize `f` in a namespace of the global registry
pub fn memoize<A, R, E, F, Fut>(
    namespace: &str,
    default_expiry: Duration,
    identity: impl Into<String>,
    f: F,
) -> Result<Memoized<A, R, E>>
where
    A: Serialize + 'static,
    R: 'static,
    E: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    global().memoize(namespace, default_expiry, identity, f)
}

/// Memoize `f` in a namespace of the global registry, keying calls by `key_fn`
pub fn memoize_keyed<A, R, E, F, Fut>(
    namespace: &str,
    default_expiry: Duration,
    identity: impl Into<String>,
    key_fn: KeyFn<A>,
    f: F,
) -> Result<Memoized<A, R, E>>
where
    A: 'static,
    R: 'static,
    E: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    global().memoize_keyed(namespace, default_expiry, identity, key_fn, f)
}
