//! In-process cache and counters.
//!
//! Used when no Redis URL is configured. State is per process, so a fleet of
//! gateways backed by these adapters neither shares cached results nor
//! aggregates statistics.

use crate::domain::CacheError;
use crate::ports::{CacheBackend, CounterStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// TTL-aware string map. Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.0.clone(), entry.1 > now));

        match hit {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Int(i64),
    Float(f64),
}

/// Counter map mirroring Redis `INCRBY`/`INCRBYFLOAT` semantics.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    counters: DashMap<String, Counter>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn increment(&self, key: &str, by: i64) -> Result<(), CacheError> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter::Int(0));
        *entry = match *entry {
            Counter::Int(v) => Counter::Int(v.saturating_add(by)),
            Counter::Float(_) => {
                return Err(CacheError::Backend(format!(
                    "counter '{key}' holds a float value"
                )))
            }
        };
        Ok(())
    }

    async fn increment_float(&self, key: &str, by: f64) -> Result<(), CacheError> {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(Counter::Float(0.0));
        *entry = match *entry {
            Counter::Int(v) => Counter::Float(v as f64 + by),
            Counter::Float(v) => Counter::Float(v + by),
        };
        Ok(())
    }

    async fn read(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Ok(keys
            .iter()
            .map(|key| {
                self.counters.get(key).map(|c| match *c {
                    Counter::Int(v) => v.to_string(),
                    Counter::Float(v) => v.to_string(),
                })
            })
            .collect())
    }
}
