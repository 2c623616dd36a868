//! Best-effort result cache.
//!
//! Wraps a [`CacheBackend`] so that no backend failure ever reaches the query
//! path: failed or slow reads are misses, failed writes are dropped. Each
//! round trip is bounded by the configured operation timeout.

use crate::domain::{cache_key, CacheConfig, CacheError, QueryHash, QueryResult};
use crate::ports::CacheBackend;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    key_prefix: String,
    operation_timeout: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            key_prefix: config.key_prefix.clone(),
            operation_timeout: config.operation_timeout,
        }
    }

    /// Full key for a query hash.
    pub fn key_for(&self, hash: &QueryHash) -> String {
        cache_key(&self.key_prefix, hash)
    }

    /// Fetch a payload. Backend errors and timeouts read as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.bounded(self.backend.get(key)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a payload. Failures are logged and discarded.
    pub async fn set(&self, key: &str, payload: &str, ttl: Duration) {
        if let Err(e) = self.bounded(self.backend.set(key, payload, ttl)).await {
            warn!(key = %key, error = %e, "Cache write failed, result not cached");
        }
    }

    /// Reachability probe for health checks. Unlike reads and writes, the error is returned.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.bounded(self.backend.ping()).await
    }

    /// Look up a cached [`QueryResult`]. Undecodable payloads are misses.
    pub async fn get_result(&self, hash: &QueryHash) -> Option<QueryResult> {
        let key = self.key_for(hash);
        let payload = self.get(&key).await?;
        match serde_json::from_str(&payload) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Cache a [`QueryResult`] under its hash.
    pub async fn put_result(&self, result: &QueryResult, ttl: Duration) {
        let key = self.key_for(&result.query_hash);
        match serde_json::to_string(result) {
            Ok(payload) => {
                self.set(&key, &payload, ttl).await;
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Result cached");
            }
            Err(e) => warn!(key = %key, error = %e, "Cannot serialize result for cache"),
        }
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
