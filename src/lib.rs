//! # autocache
//!
//! Namespaced read-through memoization for async functions over a shared,
//! expiring key-value store.
//!
//! ## Features
//!
//! - Deterministic cache keys: `autocache:{namespace}:cache:{function}:{sha256(args)}`
//! - Per-namespace default expiry with per-call overrides and forced refresh
//! - Namespace-wide invalidation by prefix scan
//! - Key functions for arguments that are not serializable
//! - Redis, in-memory, file and dispatching stores behind one async trait
//! - Function errors passed through untouched; store failures reported, never hidden
//!
//! ## Memoizing a function
//!
//! ```no_run
//! use autocache::{function_identity, memoize};
//! use std::time::Duration;
//!
//! async fn render_report(month: u32) -> Result<String, std::io::Error> {
//!     Ok(format!("report for {}", month))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let report = memoize(
//!         "reports",
//!         Duration::from_secs(600),
//!         function_identity!(render_report),
//!         render_report,
//!     )?;
//!
//!     let fresh = report.call(3).await?;
//!     let cached = report.call(3).await?;
//!     assert_eq!(fresh, cached);
//!     Ok(())
//! }
//! ```
//!
//! ## Using Redis
//!
//! ```no_run
//! use autocache::{Memoized, RedisConfig, Registry, StoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StoreConfig::Redis(RedisConfig::from_host_str("localhost:6379")?);
//!     let registry = Registry::from_config(&config).await?;
//!
//!     let users = registry.get_or_create("users", Duration::from_secs(300))?;
//!     let lookup = Memoized::new(users.clone(), "app::lookup", |id: u64| async move {
//!         Ok::<_, std::io::Error>(format!("user-{}", id))
//!     });
//!
//!     println!("{}", lookup.call(1).await?);
//!     users.clear().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Forcing a refresh
//!
//! ```no_run
//! # use autocache::{CallOptions, Memoized};
//! # async fn example(lookup: Memoized<u64, String, std::io::Error>) -> anyhow::Result<()> {
//! use std::time::Duration;
//!
//! let value = lookup
//!     .call_with(1, CallOptions::refresh().with_expiry(Duration::from_secs(30)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod memoize;
pub mod namespace;
pub mod registry;
pub mod stats;
pub mod store;

pub use codec::{CallArgs, JsonCodec, KeyCodec, ValueCodec};
pub use config::{NamespaceConfig, RedisConfig, StoreConfig};
pub use error::{CacheError, CallError, Result};
pub use key::{CacheKey, KeyFn};
pub use memoize::{CallOptions, Computed, Memoized, MemoizedMethod, WrapperInfo};
pub use namespace::{Lookup, Namespace};
pub use registry::{get_namespace, global, install_global, memoize, memoize_keyed, Registry};
pub use stats::CacheStats;
pub use store::{
    CacheStore, DispatchStore, FileStore, HealthStatus, MemoryStore, RedisStore, StoreHealth,
};
