//! Read-through memoization of async functions
//!
//! [`Memoized`] wraps a function `A -> Future<Output = Result<R, E>>` bound to a
//! [`Namespace`]. Each call derives a key from the namespace prefix, the
//! function identity and the arguments, then:
//!
//! 1. validates the [`CallOptions`] (an explicit zero expiry fails here),
//! 2. builds the key (unserializable arguments fail here, before any store access),
//! 3. unless `refresh` is set, looks the key up and returns the decoded value on a hit,
//! 4. runs the function; its error is returned as [`CallError::Function`] and nothing is cached,
//! 5. encodes and stores the result; a failed write returns [`CallError::NotStored`]
//!    carrying the computed value.
//!
//! Concurrent misses on the same key may all run the function.
//!
//! # Example
//!
//! ```no_run
//! use autocache::{function_identity, Memoized, MemoryStore, Namespace};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn load_user(id: u64) -> Result<String, std::io::Error> {
//!     Ok(format!("user-{}", id))
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let users = Arc::new(Namespace::new("users", Duration::from_secs(300), store)?);
//!
//! let cached = Memoized::new(users, function_identity!(load_user), load_user);
//! let first = cached.call(7).await?;   // runs load_user
//! let second = cached.call(7).await?;  // served from the store
//! assert_eq!(first, second);
//! # Ok(())
//! # }
//! ```

use crate::codec::{JsonCodec, ValueCodec};
use crate::error::{CallError, Result};
use crate::key::{CacheKey, KeyFn, SEPARATOR};
use crate::namespace::{validate_expiry, Lookup, Namespace};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a wrapped function that decides whether it should be cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Computed<R> {
    /// Store the value and return it
    Cache(R),
    /// Return the value without storing it; the next call runs the function again
    Skip(R),
}

impl<R> Computed<R> {
    pub fn into_inner(self) -> R {
        match self {
            Computed::Cache(value) | Computed::Skip(value) => value,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Computed::Cache(_))
    }
}

/// Per-call control flags, kept apart from the function's own arguments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Skip the lookup, run the function and overwrite the stored entry
    pub refresh: bool,

    /// Expiry for the entry written by this call instead of the namespace default
    pub expiry: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options forcing a recomputation
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            expiry: None,
        }
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    fn validate(&self) -> Result<()> {
        match self.expiry {
            Some(expiry) => validate_expiry(expiry),
            None => Ok(()),
        }
    }
}

/// Read-only description of a wrapped function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperInfo {
    /// Qualified name used in every key
    pub function_identity: String,
    /// Common prefix of every key this wrapper writes
    pub prefix: String,
    /// Whether a key function replaces the arguments in the key
    pub has_key_fn: bool,
    /// Name of the bound namespace
    pub namespace: String,
}

impl WrapperInfo {
    fn new(namespace: &Namespace, function_identity: &str, has_key_fn: bool) -> Self {
        Self {
            function_identity: function_identity.to_string(),
            prefix: format!("{}{}{}", namespace.prefix(), function_identity, SEPARATOR),
            has_key_fn,
            namespace: namespace.name().to_string(),
        }
    }
}

/// Boxed form of a wrapped function
pub type MemoFn<A, R, E> =
    dyn Fn(A) -> BoxFuture<'static, std::result::Result<Computed<R>, E>> + Send + Sync;

/// Boxed form of a wrapped method
pub type MethodFn<S, A, R, E> =
    dyn Fn(Arc<S>, A) -> BoxFuture<'static, std::result::Result<Computed<R>, E>> + Send + Sync;

/// Run the lookup / execute / store sequence for one derived key
async fn read_through<R, E, C, F>(
    namespace: &Namespace,
    codec: &C,
    key: CacheKey,
    options: CallOptions,
    execute: F,
) -> std::result::Result<R, CallError<E, R>>
where
    R: Serialize + DeserializeOwned,
    C: ValueCodec,
    F: FnOnce() -> BoxFuture<'static, std::result::Result<Computed<R>, E>>,
{
    let stats = namespace.recorder();

    if options.refresh {
        debug!("Refresh requested: {}", key);
        stats.record_refresh();
    } else {
        match namespace.get(&key).await? {
            Lookup::Hit(bytes) => {
                stats.record_hit();
                return Ok(codec.decode(&key.render(), &bytes)?);
            }
            Lookup::Miss => stats.record_miss(),
        }
    }

    let started = Instant::now();
    let outcome = execute().await;
    stats.record_execution(started.elapsed());

    let value = match outcome {
        Ok(Computed::Cache(value)) => value,
        Ok(Computed::Skip(value)) => {
            debug!("Result not cached on request: {}", key);
            return Ok(value);
        }
        Err(e) => return Err(CallError::Function(e)),
    };

    let written = match codec.encode(&value) {
        Ok(bytes) => namespace.put(&key, bytes, options.expiry).await,
        Err(e) => Err(e),
    };

    match written {
        Ok(()) => {
            stats.record_store();
            Ok(value)
        }
        Err(source) => {
            stats.record_store_failure();
            warn!("Result computed but not cached for {}: {}", key, source);
            Err(CallError::NotStored { value, source })
        }
    }
}

fn box_plain<A, R, E, F, Fut>(f: F) -> Arc<MemoFn<A, R, E>>
where
    A: 'static,
    R: 'static,
    E: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    Arc::new(move |args: A| f(args).map(|result| result.map(Computed::Cache)).boxed())
}

fn box_selective<A, R, E, F, Fut>(f: F) -> Arc<MemoFn<A, R, E>>
where
    A: 'static,
    R: 'static,
    E: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Computed<R>, E>> + Send + 'static,
{
    Arc::new(move |args: A| f(args).boxed())
}

/// A function memoized in a namespace
pub struct Memoized<A, R, E, C = JsonCodec> {
    namespace: Arc<Namespace>,
    identity: String,
    function: Arc<MemoFn<A, R, E>>,
    key_fn: KeyFn<A>,
    has_key_fn: bool,
    codec: C,
}

impl<A, R, E, C: Clone> Clone for Memoized<A, R, E, C> {
    fn clone(&self) -> Self {
        Self {
            namespace: Arc::clone(&self.namespace),
            identity: self.identity.clone(),
            function: Arc::clone(&self.function),
            key_fn: self.key_fn.clone(),
            has_key_fn: self.has_key_fn,
            codec: self.codec.clone(),
        }
    }
}

impl<A, R, E, C> fmt::Debug for Memoized<A, R, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("namespace", &self.namespace.name())
            .field("identity", &self.identity)
            .field("has_key_fn", &self.has_key_fn)
            .finish()
    }
}

impl<A, R, E> Memoized<A, R, E, JsonCodec>
where
    A: Serialize + 'static,
    R: 'static,
    E: 'static,
{
    /// Memoize `f`, keying calls by their arguments
    pub fn new<F, Fut>(namespace: Arc<Namespace>, identity: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        Self::from_parts(namespace, identity.into(), box_plain(f), KeyFn::arguments(), false)
    }

    /// Memoize a function that chooses per call whether its result is stored
    pub fn selective<F, Fut>(namespace: Arc<Namespace>, identity: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Computed<R>, E>> + Send + 'static,
    {
        Self::from_parts(namespace, identity.into(), box_selective(f), KeyFn::arguments(), false)
    }
}

impl<A, R, E> Memoized<A, R, E, JsonCodec>
where
    A: 'static,
    R: 'static,
    E: 'static,
{
    /// Memoize `f`, keying calls by `key_fn` instead of the arguments
    ///
    /// The arguments themselves do not need to be serializable.
    pub fn keyed<F, Fut>(
        namespace: Arc<Namespace>,
        identity: impl Into<String>,
        key_fn: KeyFn<A>,
        f: F,
    ) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        Self::from_parts(namespace, identity.into(), box_plain(f), key_fn, true)
    }

    fn from_parts(
        namespace: Arc<Namespace>,
        identity: String,
        function: Arc<MemoFn<A, R, E>>,
        key_fn: KeyFn<A>,
        has_key_fn: bool,
    ) -> Self {
        debug!("Memoizing {} in namespace {}", identity, namespace.name());
        Self {
            namespace,
            identity,
            function,
            key_fn,
            has_key_fn,
            codec: JsonCodec,
        }
    }
}

impl<A, R, E, C> Memoized<A, R, E, C> {
    /// Key calls by `key_fn` instead of the arguments
    pub fn with_key_fn(mut self, key_fn: KeyFn<A>) -> Self {
        self.key_fn = key_fn;
        self.has_key_fn = true;
        self
    }

    /// Encode stored values with another codec
    pub fn with_codec<C2: ValueCodec>(self, codec: C2) -> Memoized<A, R, E, C2> {
        Memoized {
            namespace: self.namespace,
            identity: self.identity,
            function: self.function,
            key_fn: self.key_fn,
            has_key_fn: self.has_key_fn,
            codec,
        }
    }

    pub fn info(&self) -> WrapperInfo {
        WrapperInfo::new(&self.namespace, &self.identity, self.has_key_fn)
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn function_identity(&self) -> &str {
        &self.identity
    }

    /// The wrapped function, uncached
    pub fn function(&self) -> &MemoFn<A, R, E> {
        self.function.as_ref()
    }

    /// The declared key function, if any
    pub fn key_fn(&self) -> Option<&KeyFn<A>> {
        self.has_key_fn.then_some(&self.key_fn)
    }

    /// Key a call with these arguments would use
    pub fn cache_key(&self, args: &A) -> Result<CacheKey> {
        let value = self.key_fn.extract(args)?;
        self.namespace.key_for_value(&self.identity, &value)
    }

    /// Run the function without touching the cache
    pub async fn call_uncached(&self, args: A) -> std::result::Result<R, E> {
        (self.function)(args).await.map(Computed::into_inner)
    }

    /// Remove the stored result for one argument set
    pub async fn invalidate(&self, args: &A) -> Result<bool> {
        let key = self.cache_key(args)?;
        Ok(self.namespace.delete(&[key]).await? > 0)
    }

    /// Remove every stored result of this function
    pub async fn clear(&self) -> Result<usize> {
        self.namespace.clear_function(&self.identity).await
    }
}

impl<A, R, E, C> Memoized<A, R, E, C>
where
    R: Serialize + DeserializeOwned,
    C: ValueCodec,
{
    /// Call with default options
    pub async fn call(&self, args: A) -> std::result::Result<R, CallError<E, R>> {
        self.call_with(args, CallOptions::default()).await
    }

    /// Call with explicit control flags
    pub async fn call_with(
        &self,
        args: A,
        options: CallOptions,
    ) -> std::result::Result<R, CallError<E, R>> {
        options.validate()?;
        let key = self.cache_key(&args)?;
        let function = Arc::clone(&self.function);

        read_through(&self.namespace, &self.codec, key, options, move || function(args)).await
    }
}

/// A method memoized in a namespace
///
/// The receiver is passed as `Arc<S>` and is left out of the key unless a
/// receiver key function is declared with
/// [`with_receiver_key`](MemoizedMethod::with_receiver_key).
pub struct MemoizedMethod<S, A, R, E, C = JsonCodec> {
    namespace: Arc<Namespace>,
    identity: String,
    method: Arc<MethodFn<S, A, R, E>>,
    key_fn: KeyFn<A>,
    has_key_fn: bool,
    receiver_key: Option<KeyFn<S>>,
    codec: C,
}

impl<S, A, R, E, C> fmt::Debug for MemoizedMethod<S, A, R, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedMethod")
            .field("namespace", &self.namespace.name())
            .field("identity", &self.identity)
            .field("has_key_fn", &self.has_key_fn)
            .field("has_receiver_key", &self.receiver_key.is_some())
            .finish()
    }
}

impl<S, A, R, E> MemoizedMethod<S, A, R, E, JsonCodec>
where
    S: 'static,
    A: Serialize + 'static,
    R: 'static,
    E: 'static,
{
    pub fn new<F, Fut>(namespace: Arc<Namespace>, identity: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let method: Arc<MethodFn<S, A, R, E>> = Arc::new(move |receiver: Arc<S>, args: A| {
            f(receiver, args)
                .map(|result| result.map(Computed::Cache))
                .boxed()
        });
        Self::from_parts(namespace, identity.into(), method)
    }

    /// Memoize a method that chooses per call whether its result is stored
    pub fn selective<F, Fut>(namespace: Arc<Namespace>, identity: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Computed<R>, E>> + Send + 'static,
    {
        let method: Arc<MethodFn<S, A, R, E>> =
            Arc::new(move |receiver: Arc<S>, args: A| f(receiver, args).boxed());
        Self::from_parts(namespace, identity.into(), method)
    }

    fn from_parts(namespace: Arc<Namespace>, identity: String, method: Arc<MethodFn<S, A, R, E>>) -> Self {
        debug!("Memoizing method {} in namespace {}", identity, namespace.name());
        Self {
            namespace,
            identity,
            method,
            key_fn: KeyFn::arguments(),
            has_key_fn: false,
            receiver_key: None,
            codec: JsonCodec,
        }
    }
}

impl<S, A, R, E, C> MemoizedMethod<S, A, R, E, C> {
    /// Include the receiver's key value in every key
    pub fn with_receiver_key(mut self, receiver_key: KeyFn<S>) -> Self {
        self.receiver_key = Some(receiver_key);
        self
    }

    /// Key calls by `key_fn` instead of the arguments
    pub fn with_key_fn(mut self, key_fn: KeyFn<A>) -> Self {
        self.key_fn = key_fn;
        self.has_key_fn = true;
        self
    }

    pub fn with_codec<C2: ValueCodec>(self, codec: C2) -> MemoizedMethod<S, A, R, E, C2> {
        MemoizedMethod {
            namespace: self.namespace,
            identity: self.identity,
            method: self.method,
            key_fn: self.key_fn,
            has_key_fn: self.has_key_fn,
            receiver_key: self.receiver_key,
            codec,
        }
    }

    pub fn info(&self) -> WrapperInfo {
        WrapperInfo::new(&self.namespace, &self.identity, self.has_key_fn)
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// The wrapped method, uncached
    pub fn function(&self) -> &MethodFn<S, A, R, E> {
        self.method.as_ref()
    }

    pub fn key_fn(&self) -> Option<&KeyFn<A>> {
        self.has_key_fn.then_some(&self.key_fn)
    }

    pub fn receiver_key(&self) -> Option<&KeyFn<S>> {
        self.receiver_key.as_ref()
    }

    /// Key a call on `receiver` with these arguments would use
    pub fn cache_key(&self, receiver: &S, args: &A) -> Result<CacheKey> {
        let args_value = self.key_fn.extract(args)?;
        let value = match &self.receiver_key {
            Some(receiver_key) => {
                serde_json::Value::Array(vec![receiver_key.extract(receiver)?, args_value])
            }
            None => args_value,
        };
        self.namespace.key_for_value(&self.identity, &value)
    }

    /// Remove the stored result for one receiver and argument set
    pub async fn invalidate(&self, receiver: &S, args: &A) -> Result<bool> {
        let key = self.cache_key(receiver, args)?;
        Ok(self.namespace.delete(&[key]).await? > 0)
    }
}

impl<S, A, R, E, C> MemoizedMethod<S, A, R, E, C>
where
    R: Serialize + DeserializeOwned,
    C: ValueCodec,
{
    pub async fn call(&self, receiver: &Arc<S>, args: A) -> std::result::Result<R, CallError<E, R>> {
        self.call_with(receiver, args, CallOptions::default()).await
    }

    pub async fn call_with(
        &self,
        receiver: &Arc<S>,
        args: A,
        options: CallOptions,
    ) -> std::result::Result<R, CallError<E, R>> {
        options.validate()?;
        let key = self.cache_key(receiver, &args)?;
        let method = Arc::clone(&self.method);
        let receiver = Arc::clone(receiver);

        read_through(&self.namespace, &self.codec, key, options, move || method(receiver, args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn namespace(name: &str) -> Arc<Namespace> {
        Arc::new(Namespace::new(name, Duration::from_secs(60), Arc::new(MemoryStore::new())).unwrap())
    }

    #[test]
    fn test_call_options() {
        let options = CallOptions::default();
        assert!(!options.refresh);
        assert!(options.expiry.is_none());

        let options = CallOptions::refresh().with_expiry(Duration::from_secs(5));
        assert!(options.refresh);
        assert_eq!(options.expiry, Some(Duration::from_secs(5)));
        assert!(options.validate().is_ok());

        assert!(CallOptions::new().with_expiry(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_computed() {
        assert!(Computed::Cache(1).is_cached());
        assert!(!Computed::Skip(1).is_cached());
        assert_eq!(Computed::Skip("v").into_inner(), "v");
    }

    #[tokio::test]
    async fn test_stats_follow_calls() {
        let ns = namespace("stats");
        let wrapped = Memoized::new(ns.clone(), "stats::double", |n: u32| async move {
            Ok::<_, std::convert::Infallible>(n * 2)
        });

        assert_eq!(wrapped.call(2).await.unwrap(), 4);
        assert_eq!(wrapped.call(2).await.unwrap(), 4);
        assert_eq!(wrapped.call_with(2, CallOptions::refresh()).await.unwrap(), 4);

        let stats = ns.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.stores, 2);
    }

    #[tokio::test]
    async fn test_info() {
        let ns = namespace("info");
        let wrapped = Memoized::new(ns, "app::lookup", |id: u64| async move {
            Ok::<_, std::convert::Infallible>(id)
        });

        let info = wrapped.info();
        assert_eq!(info.function_identity, "app::lookup");
        assert_eq!(info.prefix, "autocache:info:cache:app::lookup:");
        assert_eq!(info.namespace, "info");
        assert!(!info.has_key_fn);
        assert!(wrapped.key_fn().is_none());

        let wrapped = wrapped.with_key_fn(KeyFn::new(|id: &u64| id % 10));
        assert!(wrapped.info().has_key_fn);
        assert!(wrapped.key_fn().is_some());
    }

    #[tokio::test]
    async fn test_zero_expiry_rejected_before_running() {
        let ns = namespace("expiry");
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let wrapped = Memoized::new(ns, "expiry::f", move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, std::convert::Infallible>(n) }
        });

        let err = wrapped
            .call_with(1, CallOptions::new().with_expiry(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Cache(crate::CacheError::InvalidExpiry(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_function_and_call_uncached_bypass_cache() {
        let ns = namespace("raw");
        let wrapped = Memoized::new(ns.clone(), "raw::f", |n: u32| async move {
            Ok::<_, String>(n + 1)
        });

        assert_eq!(wrapped.call_uncached(1).await.unwrap(), 2);
        let raw = wrapped.function()(1).await.unwrap();
        assert_eq!(raw, Computed::Cache(2));
        assert!(ns.keys().await.unwrap().is_empty());
    }
}
