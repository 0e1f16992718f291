//! Configuration for namespaces and store backends
//!
//! Store settings can be built in code or read from the environment:
//!
//! | Variable               | Meaning                                    | Default     |
//! |------------------------|--------------------------------------------|-------------|
//! | `AUTOCACHE_BACKEND`    | `memory`, `redis` or `file`                | `memory`    |
//! | `REDIS_HOST`           | host, or `host:port`                       | `localhost` |
//! | `REDIS_PORT`           | port                                       | `6379`      |
//! | `REDIS_DB`             | database index                             | `0`         |
//! | `REDIS_PASSWORD`       | password                                   | unset       |
//! | `REDIS_TIMEOUT_MS`     | connect and per-command timeout            | `5000`      |
//! | `AUTOCACHE_FILE_ROOT`  | directory for the file backend             | tmp/autocache |

use crate::error::{CacheError, Result};
use crate::store::{CacheStore, FileStore, MemoryStore, RedisStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Settings for one namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name, also the middle segment of every key
    pub name: String,

    /// Expiry applied when a call does not override it
    pub default_expiry: Duration,

    /// Expiry jitter factor (0.0 - 1.0).
    /// Spreads expirations of entries written together.
    pub ttl_jitter: f64,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>, default_expiry: Duration) -> Self {
        Self {
            name: name.into(),
            default_expiry,
            ttl_jitter: 0.0,
        }
    }

    pub fn builder(name: impl Into<String>) -> NamespaceConfigBuilder {
        NamespaceConfigBuilder {
            name: name.into(),
            default_expiry: None,
            ttl_jitter: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_namespace_name(&self.name)?;

        if self.default_expiry.is_zero() {
            return Err(CacheError::InvalidExpiry(format!(
                "default expiry for namespace {:?} must be positive",
                self.name
            )));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default expiry with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_expiry;
        }

        let base_secs = self.default_expiry.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::try_from_secs_f64(final_secs).unwrap_or(Duration::MAX)
    }
}

/// Builder for [`NamespaceConfig`]
#[derive(Debug)]
pub struct NamespaceConfigBuilder {
    name: String,
    default_expiry: Option<Duration>,
    ttl_jitter: Option<f64>,
}

impl NamespaceConfigBuilder {
    pub fn default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = Some(expiry);
        self
    }

    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<NamespaceConfig> {
        let config = NamespaceConfig {
            name: self.name,
            // 1 hour when not given
            default_expiry: self.default_expiry.unwrap_or(Duration::from_secs(3600)),
            ttl_jitter: self.ttl_jitter.unwrap_or(0.0),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Reject names that would make one namespace's prefix overlap another's,
/// or that would be read as a pattern by the store's key scan.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CacheError::InvalidNamespace {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.contains(':') {
        return Err(invalid("name must not contain ':'"));
    }
    if name.chars().any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\')) {
        return Err(invalid("name must not contain glob characters"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid("name must not contain whitespace"));
    }
    Ok(())
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,

    /// Database index
    pub db: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Full connection URL. Overrides host, port, db and password when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bound on establishing a connection
    pub connect_timeout: Duration,

    /// Bound on every individual command
    pub command_timeout: Duration,

    /// COUNT hint for SCAN during namespace enumeration
    pub scan_count: usize,

    /// Response time above which a health check reports degraded
    pub degraded_threshold_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            db: 0,
            password: None,
            url: None,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            scan_count: 500,
            degraded_threshold_ms: 1000,
        }
    }
}

impl RedisConfig {
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::default()
    }

    /// Parse `host` or `host:port`
    pub fn from_host_str(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split(':').collect();
        let (host, port) = match parts.as_slice() {
            [host] => (*host, DEFAULT_REDIS_PORT),
            [host, port] => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| {
                        CacheError::Config(format!("invalid port {:?} in {:?}", port, input))
                    })?;
                (*host, port)
            }
            _ => {
                return Err(CacheError::Config(format!(
                    "{} is not a valid host (expected host or host:port)",
                    input
                )))
            }
        };

        if host.is_empty() {
            return Err(CacheError::Config("redis host must not be empty".to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            ..Default::default()
        })
    }

    /// Connection URL handed to the client
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL safe for logs
    pub fn redacted_url(&self) -> String {
        match (&self.url, &self.password) {
            (Some(_), _) => "redis://<configured url>".to_string(),
            (None, Some(_)) => format!("redis://:***@{}:{}/{}", self.host, self.port, self.db),
            (None, None) => self.connection_url(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_none() && self.host.is_empty() {
            return Err(CacheError::Config("redis host must not be empty".to_string()));
        }
        if self.db < 0 {
            return Err(CacheError::Config("redis db index must not be negative".to_string()));
        }
        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(CacheError::Config("redis timeouts must be positive".to_string()));
        }
        if self.scan_count == 0 {
            return Err(CacheError::Config("scan_count must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`RedisConfig`]
#[derive(Debug, Default)]
pub struct RedisConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    db: Option<i64>,
    password: Option<String>,
    url: Option<String>,
    timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    scan_count: Option<usize>,
}

impl RedisConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set both the connect and command timeouts
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn scan_count(mut self, count: usize) -> Self {
        self.scan_count = Some(count);
        self
    }

    pub fn build(self) -> RedisConfig {
        let defaults = RedisConfig::default();
        let connect_timeout = self.timeout.unwrap_or(defaults.connect_timeout);

        RedisConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            db: self.db.unwrap_or(defaults.db),
            password: self.password,
            url: self.url,
            connect_timeout,
            command_timeout: self
                .command_timeout
                .or(self.timeout)
                .unwrap_or(defaults.command_timeout),
            scan_count: self.scan_count.unwrap_or(defaults.scan_count),
            degraded_threshold_ms: defaults.degraded_threshold_ms,
        }
    }
}

/// Which store a registry talks to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store
    Memory,
    /// Shared Redis server
    Redis(RedisConfig),
    /// One file per entry under `root`
    File { root: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

impl StoreConfig {
    /// Read the store configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load a `.env` file if present, then read the environment
    pub fn from_dotenv() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_env()
    }

    /// Open the configured store. Redis connections are verified with `PING`.
    pub async fn connect(&self) -> Result<Arc<dyn CacheStore>> {
        let store: Arc<dyn CacheStore> = match self {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Redis(config) => Arc::new(RedisStore::connect(config.clone()).await?),
            StoreConfig::File { root } => Arc::new(FileStore::new(root.clone()).await?),
        };
        tracing::info!("Using {} cache store", store.backend_name());
        Ok(store)
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("AUTOCACHE_BACKEND").unwrap_or_else(|| "memory".to_string());

        match backend.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreConfig::Memory),
            "file" => {
                let root = lookup("AUTOCACHE_FILE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("autocache"));
                Ok(StoreConfig::File { root })
            }
            "redis" => {
                let mut config = match lookup("REDIS_HOST") {
                    Some(host) => RedisConfig::from_host_str(&host)?,
                    None => RedisConfig::default(),
                };
                if let Some(port) = lookup("REDIS_PORT") {
                    config.port = port
                        .parse()
                        .map_err(|_| CacheError::Config(format!("invalid REDIS_PORT: {}", port)))?;
                }
                if let Some(db) = lookup("REDIS_DB") {
                    config.db = db
                        .parse()
                        .map_err(|_| CacheError::Config(format!("invalid REDIS_DB: {}", db)))?;
                }
                config.password = lookup("REDIS_PASSWORD").filter(|p| !p.is_empty());
                if let Some(ms) = lookup("REDIS_TIMEOUT_MS") {
                    let ms: u64 = ms.parse().map_err(|_| {
                        CacheError::Config(format!("invalid REDIS_TIMEOUT_MS: {}", ms))
                    })?;
                    config.connect_timeout = Duration::from_millis(ms);
                    config.command_timeout = Duration::from_millis(ms);
                }
                config.validate()?;
                Ok(StoreConfig::Redis(config))
            }
            other => Err(CacheError::Config(format!(
                "unknown AUTOCACHE_BACKEND {:?} (expected memory, redis or file)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_namespace_config_validation() {
        assert!(NamespaceConfig::new("users", Duration::from_secs(60))
            .validate()
            .is_ok());

        let err = NamespaceConfig::new("users", Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidExpiry(_)));

        let mut config = NamespaceConfig::new("users", Duration::from_secs(60));
        config.ttl_jitter = 1.5;
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_namespace_names() {
        assert!(validate_namespace_name("unittest").is_ok());
        assert!(validate_namespace_name("user-profiles_v2").is_ok());
        assert!(validate_namespace_name("").is_err());
        assert!(validate_namespace_name("a:b").is_err());
        assert!(validate_namespace_name("a*").is_err());
        assert!(validate_namespace_name("a b").is_err());
    }

    #[test]
    fn test_namespace_config_builder() {
        let config = NamespaceConfig::builder("reports")
            .default_expiry(Duration::from_secs(600))
            .ttl_jitter(0.1)
            .build()
            .unwrap();

        assert_eq!(config.default_expiry, Duration::from_secs(600));
        assert_eq!(config.ttl_jitter, 0.1);

        assert!(NamespaceConfig::builder("bad:name").build().is_err());
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = NamespaceConfig {
            name: "ns".to_string(),
            default_expiry: Duration::from_secs(3600),
            ttl_jitter: 0.1,
        };

        let ttl = config.ttl_with_jitter();
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);

        let exact = NamespaceConfig::new("ns", Duration::from_secs(30));
        assert_eq!(exact.ttl_with_jitter(), Duration::from_secs(30));
    }

    #[test]
    fn test_ttl_with_jitter_saturates() {
        let config = NamespaceConfig::builder("forever")
            .default_expiry(Duration::MAX)
            .ttl_jitter(0.5)
            .build()
            .unwrap();

        for _ in 0..20 {
            assert!(config.ttl_with_jitter() >= Duration::from_secs(u64::MAX / 4));
        }
    }

    #[test]
    fn test_redis_host_parsing() {
        let config = RedisConfig::from_host_str("cache.internal").unwrap();
        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, 6379);

        let config = RedisConfig::from_host_str("localhost:6380").unwrap();
        assert_eq!(config.port, 6380);

        assert!(RedisConfig::from_host_str("a:b:c").is_err());
        let err = RedisConfig::from_host_str("localhost:http").unwrap_err();
        assert!(err.to_string().contains("\"http\""));
        assert!(err.to_string().contains("localhost:http"));
        assert!(RedisConfig::from_host_str(":6379").is_err());
    }

    #[test]
    fn test_redis_urls() {
        let config = RedisConfig::builder().host("db").port(7000).db(2).build();
        assert_eq!(config.connection_url(), "redis://db:7000/2");

        let config = RedisConfig::builder().password("secret").build();
        assert_eq!(config.connection_url(), "redis://:secret@localhost:6379/0");
        assert!(!config.redacted_url().contains("secret"));

        let config = RedisConfig::builder().url("redis://other:1/3").build();
        assert_eq!(config.connection_url(), "redis://other:1/3");
    }

    #[test]
    fn test_redis_builder_timeouts() {
        let config = RedisConfig::builder()
            .timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.command_timeout, Duration::from_millis(250));

        let mut invalid = RedisConfig::default();
        invalid.scan_count = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_store_config_from_lookup() {
        let config = StoreConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(matches!(config, StoreConfig::Memory));

        let config = StoreConfig::from_lookup(lookup_from(&[
            ("AUTOCACHE_BACKEND", "redis"),
            ("REDIS_HOST", "cache:6390"),
            ("REDIS_DB", "4"),
            ("REDIS_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        match config {
            StoreConfig::Redis(redis) => {
                assert_eq!(redis.host, "cache");
                assert_eq!(redis.port, 6390);
                assert_eq!(redis.db, 4);
                assert_eq!(redis.command_timeout, Duration::from_millis(1500));
            }
            other => panic!("expected redis config, got {:?}", other),
        }

        let config = StoreConfig::from_lookup(lookup_from(&[
            ("AUTOCACHE_BACKEND", "file"),
            ("AUTOCACHE_FILE_ROOT", "/var/cache/app"),
        ]))
        .unwrap();
        assert!(matches!(config, StoreConfig::File { ref root } if root == &PathBuf::from("/var/cache/app")));

        assert!(StoreConfig::from_lookup(lookup_from(&[("AUTOCACHE_BACKEND", "memcached")])).is_err());
        assert!(StoreConfig::from_lookup(lookup_from(&[
            ("AUTOCACHE_BACKEND", "redis"),
            ("REDIS_PORT", "not-a-port"),
        ]))
        .is_err());
    }
}
