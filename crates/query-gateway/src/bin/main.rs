//! Query gateway server.
//!
//! Configuration comes from defaults, the TOML file named by `QG_CONFIG`, and
//! `QG_*` environment variables, in that order.

use anyhow::{Context, Result};
use query_gateway::adapters::{
    MemoryCache, MemoryCounters, PostgresStore, RedisCache, StaticTokenVerifier,
};
use query_gateway::ports::{CacheBackend, CounterStore, SystemTimeSource};
use query_gateway::{Collaborators, GatewayConfig, QueryGatewayService, VERSION};
use query_telemetry::{init_telemetry, TelemetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("failed to initialize logging")?;

    let config = GatewayConfig::load().context("failed to load configuration")?;
    info!(
        version = VERSION,
        addr = %config.http_addr(),
        max_rows = config.limits.max_rows,
        allowed_tables = config.policy.allowed_tables.len(),
        "Starting query gateway"
    );

    let store = Arc::new(PostgresStore::connect(&config.database)?);

    let (cache, counters): (Arc<dyn CacheBackend>, Arc<dyn CounterStore>) =
        match &config.cache.redis_url {
            Some(url) => {
                let redis = Arc::new(RedisCache::open(url, config.cache.operation_timeout)?);
                (redis.clone() as Arc<dyn CacheBackend>, redis as Arc<dyn CounterStore>)
            }
            None => {
                warn!("No redis url configured, using per-process cache and counters");
                let memory = Arc::new(MemoryCache::new());
                spawn_purge(Arc::clone(&memory));
                (
                    memory as Arc<dyn CacheBackend>,
                    Arc::new(MemoryCounters::new()) as Arc<dyn CounterStore>,
                )
            }
        };

    let verifier = StaticTokenVerifier::new(&config.auth);
    if verifier.is_empty() {
        warn!("No API tokens configured, every authenticated route will answer 401");
    }

    let mut service = QueryGatewayService::new(
        config,
        Collaborators {
            store,
            cache,
            counters,
            clock: Arc::new(SystemTimeSource),
        },
        Arc::new(verifier),
    )?;
    service.start().await?;

    info!("Query gateway is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Initiating graceful shutdown...");
    service.shutdown();
    service.wait().await?;

    Ok(())
}

/// Periodically drop expired entries from the in-process cache.
fn spawn_purge(cache: Arc<MemoryCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    });
}
