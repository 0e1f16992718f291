//! Redis-backed store
//!
//! Shares cached results between processes. Keys are written with a
//! millisecond expiry (`SET key value PX ms`), so Redis itself drops
//! expired entries. Namespace enumeration uses incremental `SCAN`,
//! never `KEYS`.

use super::{CacheStore, KeyStream, StoreHealth};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Redis store over a single multiplexed connection
///
/// The connection is opened on first use and re-opened after an I/O failure.
pub struct RedisStore {
    client: Client,
    config: RedisConfig,
    connection: ConnectionSlot,
}

/// Cached connection, shared with open key scans so they can drop it too
type ConnectionSlot = Arc<RwLock<Option<MultiplexedConnection>>>;

/// Errors after which the cached connection is discarded
fn needs_reconnect(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.redacted_url())
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Create a store without connecting
    pub fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::open(config.connection_url())
            .map_err(|e| CacheError::Config(format!("invalid redis url: {}", e)))?;

        Ok(Self {
            client,
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// Create a store and verify the server answers `PING`
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        info!("Connecting to Redis at {}", config.redacted_url());

        let store = Self::new(config)?;
        store.ping().await?;

        info!("Redis connection established");
        Ok(store)
    }

    /// Shorthand for `host:port` with default settings
    pub async fn connect_host(host: &str) -> Result<Self> {
        Self::connect(RedisConfig::from_host_str(host)?).await
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Send `PING` and expect `PONG`
    pub async fn ping(&self) -> Result<()> {
        let pong: String = self
            .run(|mut conn| async move {
                let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok::<_, RedisError>(pong)
            })
            .await?;

        if pong != "PONG" {
            return Err(CacheError::StoreUnavailable(format!(
                "unexpected PING reply: {}",
                pong
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            CacheError::StoreUnavailable(format!(
                "timed out connecting to {} after {:?}",
                self.config.redacted_url(),
                self.config.connect_timeout
            ))
        })?
        .map_err(|e| {
            CacheError::StoreUnavailable(format!(
                "failed to connect to {}: {}",
                self.config.redacted_url(),
                e
            ))
        })?;

        debug!("Opened Redis connection to {}", self.config.redacted_url());
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }

    /// Run one command with the command timeout applied
    async fn run<T, F, Fut>(&self, command: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = std::result::Result<T, RedisError>>,
    {
        let conn = self.connection().await?;

        match timeout(self.config.command_timeout, command(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if needs_reconnect(&e) {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
            Err(_) => {
                self.reset_connection().await;
                Err(CacheError::StoreUnavailable(format!(
                    "redis command timed out after {:?}",
                    self.config.command_timeout
                )))
            }
        }
    }
}

/// Escape glob metacharacters so a literal prefix can be used as a `MATCH` pattern
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

struct ScanState {
    conn: MultiplexedConnection,
    slot: ConnectionSlot,
    cursor: u64,
    buffer: VecDeque<String>,
    finished: bool,
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run(|mut conn| async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok::<_, RedisError>(value)
        })
        .await
        .map_err(|e| {
            warn!("Redis GET failed for {}: {}", key, e);
            e
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Duration) -> Result<()> {
        // PX takes a positive integer
        let millis = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX).max(1);

        self.run(|mut conn| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn)
                .await?;
            Ok::<_, RedisError>(())
        })
        .await
        .map_err(|e| {
            warn!("Redis SET failed for {}: {}", key, e);
            e
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.run(|mut conn| async move {
            let removed: usize = redis::cmd("DEL").arg(keys.to_vec()).query_async(&mut conn).await?;
            Ok::<_, RedisError>(removed)
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<KeyStream> {
        let conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let prefix = prefix.to_string();
        let count = self.config.scan_count;
        let command_timeout = self.config.command_timeout;

        let state = ScanState {
            conn,
            slot: Arc::clone(&self.connection),
            cursor: 0,
            buffer: VecDeque::new(),
            finished: false,
        };

        let keys = stream::try_unfold(state, move |mut state| {
            let pattern = pattern.clone();
            async move {
                loop {
                    if let Some(key) = state.buffer.pop_front() {
                        return Ok::<_, CacheError>(Some((key, state)));
                    }
                    if state.finished {
                        return Ok(None);
                    }

                    let mut scan = redis::cmd("SCAN");
                    scan.arg(state.cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(count);
                    let query = scan.query_async(&mut state.conn);
                    let (next, batch): (u64, Vec<String>) = match timeout(command_timeout, query).await {
                        Ok(Ok(reply)) => reply,
                        Ok(Err(e)) => {
                            if needs_reconnect(&e) {
                                *state.slot.write().await = None;
                            }
                            return Err(e.into());
                        }
                        Err(_) => {
                            *state.slot.write().await = None;
                            return Err(CacheError::StoreUnavailable(format!(
                                "redis SCAN timed out after {:?}",
                                command_timeout
                            )));
                        }
                    };

                    state.cursor = next;
                    state.finished = next == 0;
                    state.buffer.extend(batch);
                }
            }
        })
        .try_filter(move |key| futures::future::ready(key.starts_with(&prefix)));

        Ok(keys.boxed())
    }

    async fn health_check(&self) -> StoreHealth {
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => StoreHealth::healthy(
                self.backend_name(),
                start.elapsed(),
                self.config.degraded_threshold_ms,
            ),
            Err(e) => StoreHealth::unhealthy(self.backend_name(), start.elapsed(), e),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("autocache:ns:cache:"), "autocache:ns:cache:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn test_reconnect_only_on_connection_errors() {
        let io = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(needs_reconnect(&io));

        let reply = RedisError::from((redis::ErrorKind::TypeError, "unexpected reply"));
        assert!(!needs_reconnect(&reply));
    }

    #[test]
    fn test_new_does_not_connect() {
        let config = RedisConfig::builder().host("127.0.0.1").port(1).build();
        let store = RedisStore::new(config).unwrap();
        assert_eq!(store.backend_name(), "redis");
        assert!(format!("{:?}", store).contains("127.0.0.1"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = RedisConfig::default();
        config.scan_count = 0;
        assert!(RedisStore::new(config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_store_unavailable() {
        let config = RedisConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .timeout(Duration::from_millis(200))
            .build();
        let store = RedisStore::new(config).unwrap();

        let err = store.get("any").await.unwrap_err();
        assert!(err.is_store_failure());

        let health = store.health_check().await;
        assert!(!health.status.is_operational());
    }
}
