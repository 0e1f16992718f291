//! Memoization Demo Application
//!
//! Memoizes a slow function, shows hits, refreshes and namespace clears.
//!
//! Usage:
//!   cargo run --example memoize_demo
//!
//! Environment variables (also read from `.env`):
//!   AUTOCACHE_BACKEND   - memory, redis or file (default: memory)
//!   REDIS_HOST          - Redis host or host:port (default: localhost)
//!   AUTOCACHE_FILE_ROOT - directory for the file backend
//!   RUST_LOG            - log filter (default: info)

use autocache::{function_identity, CallOptions, Memoized, Registry, StoreConfig};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn slow_square(n: u64) -> Result<u64, std::io::Error> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(n * n)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StoreConfig::from_dotenv()?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== autocache demo ===");

    let registry = Registry::from_config(&config).await?;
    let health = registry.store().health_check().await;
    info!(
        "Store {} is {:?} ({}ms)",
        health.backend, health.status, health.response_time_ms
    );

    let demo = registry.get_or_create("demo", Duration::from_secs(60))?;
    let square = Memoized::new(demo.clone(), function_identity!(slow_square), slow_square);
    info!("Wrapped: {:?}", square.info());

    for label in ["first call", "second call"] {
        let started = Instant::now();
        let value = square.call(12).await?;
        info!("{}: {} in {:?}", label, value, started.elapsed());
    }

    let started = Instant::now();
    let value = square.call_with(12, CallOptions::refresh()).await?;
    info!("refreshed: {} in {:?}", value, started.elapsed());

    info!("Keys in namespace: {:?}", demo.keys().await?);
    info!("{}", demo.stats());

    let removed = demo.clear().await?;
    info!("Cleared {} entries", removed);

    Ok(())
}
