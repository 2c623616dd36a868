//! Redis-backed result cache and statistics counters.
//!
//! The connection is established on first use and re-established after a
//! failed attempt, so the gateway starts and serves queries while Redis is
//! down. Every command is bounded by the operation timeout.

use crate::domain::{CacheError, GatewayError};
use crate::ports::{CacheBackend, CounterStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    operation_timeout: Duration,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connected", &self.connection.initialized())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisCache {
    /// Parse the URL. No connection is made until the first command.
    pub fn open(redis_url: &str, operation_timeout: Duration) -> Result<Self, GatewayError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| GatewayError::Config(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            operation_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                debug!("Connected to redis");
                Ok::<_, RedisError>(manager)
            })
            .await
            .cloned()
            .map_err(|e| {
                warn!(error = %e, "Redis connection failed");
                cache_error(e)
            })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout)?
    }
}

fn cache_error(e: RedisError) -> CacheError {
    if e.is_timeout() {
        CacheError::Timeout
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Backend(e.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await.map_err(cache_error)?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(cache_error)?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(cache_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl CounterStore for RedisCache {
    async fn increment(&self, key: &str, by: i64) -> Result<(), CacheError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: i64 = redis::cmd("INCRBY")
                .arg(key)
                .arg(by)
                .query_async(&mut conn)
                .await
                .map_err(cache_error)?;
            Ok(())
        })
        .await
    }

    async fn increment_float(&self, key: &str, by: f64) -> Result<(), CacheError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("INCRBYFLOAT")
                .arg(key)
                .arg(by)
                .query_async(&mut conn)
                .await
                .map_err(cache_error)?;
            Ok(())
        })
        .await
    }

    async fn read(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(async {
            let mut conn = self.connection().await?;
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut conn)
                .await
                .map_err(cache_error)?;
            Ok(values)
        })
        .await
    }
}
