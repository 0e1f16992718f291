//! Error types for memoized calls and cache operations
//!
//! [`CacheError`] covers everything the caching layer itself can fail on.
//! [`CallError`] is what a memoized call returns: it keeps the wrapped
//! function's own error untouched and separates it from cache failures.

use std::fmt;
use thiserror::Error;

/// Errors raised by key derivation, namespaces and stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key codec could not encode the call arguments.
    /// Supplying a key function that reduces the arguments to a
    /// serializable identity avoids this.
    #[error("Unserializable argument: {0}")]
    UnserializableArgument(String),

    /// A caller-supplied key function failed
    #[error("Invalid key function: {0}")]
    InvalidKeyFunction(String),

    /// A non-positive expiry was given explicitly
    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    /// The backing store could not be reached or answered with a protocol error
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Namespace name rejected
    #[error("Invalid namespace {name:?}: {reason}")]
    InvalidNamespace { name: String, reason: String },

    /// A return value could not be encoded for storage
    #[error("Encode error: {0}")]
    Encode(String),

    /// A stored value could not be decoded into the expected type
    #[error("Decode error for key {key}: {reason} (call with refresh to overwrite)")]
    Decode { key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl CacheError {
    /// Whether the error came from the backing store rather than from the caller's input
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_) | CacheError::Io(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error returned by a memoized call
///
/// `E` is the wrapped function's error type and `R` its success type.
#[derive(Debug)]
pub enum CallError<E, R> {
    /// The wrapped function failed. The error is passed through as-is and nothing was cached.
    Function(E),

    /// Key derivation, lookup or decoding failed before the function could be served
    Cache(CacheError),

    /// The function succeeded but its result could not be written to the store.
    /// The computed value is handed back alongside the failure.
    NotStored { value: R, source: CacheError },
}

impl<E, R> CallError<E, R> {
    /// The wrapped function's error, if that is what failed
    pub fn function_error(self) -> Option<E> {
        match self {
            CallError::Function(e) => Some(e),
            _ => None,
        }
    }

    /// The cache-side failure, if any
    pub fn cache_error(&self) -> Option<&CacheError> {
        match self {
            CallError::Function(_) => None,
            CallError::Cache(e) => Some(e),
            CallError::NotStored { source, .. } => Some(source),
        }
    }

    /// Recover the computed value when only the store write failed
    pub fn into_value(self) -> Option<R> {
        match self {
            CallError::NotStored { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_not_stored(&self) -> bool {
        matches!(self, CallError::NotStored { .. })
    }
}

impl<E, R> From<CacheError> for CallError<E, R> {
    fn from(err: CacheError) -> Self {
        CallError::Cache(err)
    }
}

impl<E: fmt::Display, R> fmt::Display for CallError<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Function(e) => write!(f, "{}", e),
            CallError::Cache(e) => write!(f, "{}", e),
            CallError::NotStored { source, .. } => {
                write!(f, "Result computed but not cached: {}", source)
            }
        }
    }
}

impl<E, R> std::error::Error for CallError<E, R>
where
    E: fmt::Debug + fmt::Display,
    R: fmt::Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Function(_) => None,
            CallError::Cache(e) => Some(e),
            CallError::NotStored { source, .. } => Some(source),
        }
    }
}
