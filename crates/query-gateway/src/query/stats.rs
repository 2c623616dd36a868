//! Aggregate execution statistics.
//!
//! Counters live in a shared [`CounterStore`] so every gateway instance
//! contributes to the same totals. The slow-query log is process-local.

use crate::domain::{round2, CacheError, QueryHash, SlowQuery, StatsConfig, StatsView};
use crate::ports::{CounterStore, TimeSource};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

const TOTAL_QUERIES: &str = "total_queries";
const CACHED_QUERIES: &str = "cached_queries";
const FAILED_QUERIES: &str = "failed_queries";
const TOTAL_EXECUTION_TIME: &str = "total_execution_time";

/// Longest query preview kept in the slow log, in characters.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("counter store unavailable: {0}")]
    Unavailable(#[from] CacheError),

    #[error("counter '{key}' holds a non-numeric value")]
    Corrupt { key: String },
}

pub struct StatsRecorder {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn TimeSource>,
    key_prefix: String,
    slow_threshold_ms: f64,
    slow_log_size: usize,
    slow_log: Mutex<VecDeque<SlowQuery>>,
}

impl StatsRecorder {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn TimeSource>,
        config: &StatsConfig,
    ) -> Self {
        Self {
            counters,
            clock,
            key_prefix: config.key_prefix.clone(),
            slow_threshold_ms: config.slow_query_threshold_ms,
            slow_log_size: config.slow_query_log_size,
            slow_log: Mutex::new(VecDeque::with_capacity(config.slow_query_log_size)),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    /// Count one request that passed validation.
    ///
    /// `executed` is true when the store ran the query successfully, `cached`
    /// when it was answered from cache. A request that is neither counts as a
    /// failure. Counter store errors are logged and swallowed.
    pub async fn record(&self, executed: bool, cached: bool, duration_ms: f64) {
        if let Err(e) = self.try_record(executed, cached, duration_ms).await {
            warn!(error = %e, "Failed to update query statistics");
        }
    }

    async fn try_record(
        &self,
        executed: bool,
        cached: bool,
        duration_ms: f64,
    ) -> Result<(), CacheError> {
        self.counters.increment(&self.key(TOTAL_QUERIES), 1).await?;
        if cached {
            self.counters.increment(&self.key(CACHED_QUERIES), 1).await?;
        }
        if !executed && !cached {
            self.counters.increment(&self.key(FAILED_QUERIES), 1).await?;
        }
        if executed {
            self.counters
                .increment_float(&self.key(TOTAL_EXECUTION_TIME), duration_ms)
                .await?;
        }
        Ok(())
    }

    /// Keep `query` in the slow log if it ran at or above the threshold.
    pub fn observe_slow_query(&self, hash: &QueryHash, query: &str, duration_ms: f64) -> bool {
        if duration_ms < self.slow_threshold_ms || self.slow_log_size == 0 {
            return false;
        }

        let mut preview: String = query.chars().take(PREVIEW_CHARS).collect();
        if query.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }

        info!(
            query_hash = %hash,
            elapsed_ms = round2(duration_ms),
            threshold_ms = self.slow_threshold_ms,
            "Slow query"
        );

        let mut log = self.slow_log.lock();
        if log.len() == self.slow_log_size {
            log.pop_back();
        }
        log.push_front(SlowQuery {
            query_hash: hash.clone(),
            query_preview: preview,
            execution_time_ms: round2(duration_ms),
            timestamp: self.clock.now(),
        });
        true
    }

    /// Current totals with derived averages.
    pub async fn snapshot(&self) -> Result<StatsView, StatsError> {
        let names = [
            TOTAL_QUERIES,
            CACHED_QUERIES,
            FAILED_QUERIES,
            TOTAL_EXECUTION_TIME,
        ];
        let keys: Vec<String> = names.iter().map(|n| self.key(n)).collect();
        let values = self.counters.read(&keys).await?;

        let int_at = |idx: usize| -> Result<u64, StatsError> {
            match values.get(idx).cloned().flatten() {
                None => Ok(0),
                Some(raw) => raw
                    .trim()
                    .parse::<i64>()
                    .map(|v| v.max(0) as u64)
                    .map_err(|_| StatsError::Corrupt {
                        key: keys[idx].clone(),
                    }),
            }
        };

        let total_queries = int_at(0)?;
        let cached_queries = int_at(1)?;
        let failed_queries = int_at(2)?;
        let cumulative_ms = match values.get(3).cloned().flatten() {
            None => 0.0,
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| StatsError::Corrupt {
                key: keys[3].clone(),
            })?,
        };

        let (avg_execution_time, cache_hit_rate) = if total_queries == 0 {
            (0.0, 0.0)
        } else {
            (
                round2(cumulative_ms / total_queries as f64),
                round2(cached_queries as f64 / total_queries as f64 * 100.0),
            )
        };

        Ok(StatsView {
            total_queries,
            cached_queries,
            failed_queries,
            avg_execution_time,
            cache_hit_rate,
            slow_queries: self.slow_log.lock().iter().cloned().collect(),
        })
    }
}
