//! Cache key layout
//!
//! Rendered form: `{namespace_prefix}{function_identity}:{argument_digest}`,
//! e.g. `autocache:users:cache:app::load_user:3f1c...`.

use crate::codec::KeyCodec;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Global prefix shared by every namespace
pub const GLOBAL_NAMESPACE: &str = "autocache";

/// Separator between key segments
pub const SEPARATOR: char = ':';

/// Segment marking cached results inside a namespace
pub const CACHE_SEGMENT: &str = "cache";

/// Build the store prefix for a namespace name
pub fn namespace_prefix(name: &str) -> String {
    format!(
        "{global}{sep}{name}{sep}{segment}{sep}",
        global = GLOBAL_NAMESPACE,
        sep = SEPARATOR,
        name = name,
        segment = CACHE_SEGMENT,
    )
}

/// Stable, qualified identity for a function: `module::path::name`
#[macro_export]
macro_rules! function_identity {
    ($name:ident) => {
        concat!(module_path!(), "::", stringify!($name))
    };
}

/// Fully derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    namespace_prefix: String,
    function_identity: String,
    argument_digest: String,
}

impl CacheKey {
    pub fn new(
        namespace_prefix: impl Into<String>,
        function_identity: impl Into<String>,
        argument_digest: impl Into<String>,
    ) -> Self {
        Self {
            namespace_prefix: namespace_prefix.into(),
            function_identity: function_identity.into(),
            argument_digest: argument_digest.into(),
        }
    }

    pub fn namespace_prefix(&self) -> &str {
        &self.namespace_prefix
    }

    pub fn function_identity(&self) -> &str {
        &self.function_identity
    }

    pub fn argument_digest(&self) -> &str {
        &self.argument_digest
    }

    /// Key as sent to the store
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Key without the namespace prefix
    pub fn local_part(&self) -> String {
        format!(
            "{}{}{}",
            self.function_identity, SEPARATOR, self.argument_digest
        )
    }
}

type KeyExtractor<A> = dyn Fn(&A) -> Result<Value> + Send + Sync;

/// Reduces call arguments to the value that identifies them in the cache
///
/// Use one when the arguments are not serializable, or when only part of them
/// should count: `KeyFn::new(|user: &User| user.id)`.
pub struct KeyFn<A: ?Sized> {
    extract: Arc<KeyExtractor<A>>,
}

impl<A: ?Sized> Clone for KeyFn<A> {
    fn clone(&self) -> Self {
        Self {
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<A: ?Sized> fmt::Debug for KeyFn<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFn")
    }
}

impl<A: ?Sized> KeyFn<A> {
    /// Key function that cannot fail
    pub fn new<K, F>(f: F) -> Self
    where
        A: 'static,
        K: Serialize,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(move |args: &A| KeyCodec::to_value(&f(args))),
        }
    }

    /// Key function that may reject the arguments
    ///
    /// A rejection surfaces as [`CacheError::InvalidKeyFunction`].
    pub fn try_new<K, E, F>(f: F) -> Self
    where
        A: 'static,
        K: Serialize,
        E: fmt::Display,
        F: Fn(&A) -> std::result::Result<K, E> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(move |args: &A| match f(args) {
                Ok(key) => KeyCodec::to_value(&key),
                Err(e) => Err(CacheError::InvalidKeyFunction(e.to_string())),
            }),
        }
    }

    /// Identity key function: the arguments are their own key
    pub(crate) fn arguments() -> Self
    where
        A: Serialize + 'static,
    {
        Self {
            extract: Arc::new(|args: &A| KeyCodec::to_value(args)),
        }
    }

    /// Apply to a set of arguments
    pub fn extract(&self, args: &A) -> Result<Value> {
        (self.extract)(args)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.namespace_prefix, self.function_identity, SEPARATOR, self.argument_digest
        )
    }
}
