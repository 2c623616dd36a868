//! Query execution against the relational store.

use crate::domain::{
    bind, round2, ApiError, BindingError, QueryHash, QueryParameters, Row, StoreError,
    ValidatedQuery,
};
use crate::ports::QueryStore;
use crate::query::stats::StatsRecorder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

static LIMIT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

/// Slack given to the store to report its own statement timeout before the
/// engine stops waiting.
const STORE_GRACE: Duration = Duration::from_secs(1);

/// Rows and timing from one successful run
#[derive(Debug, Clone)]
pub struct Execution {
    pub rows: Vec<Row>,
    pub execution_time_ms: f64,
    pub explain_plan: Option<serde_json::Value>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("parameter type mismatch: {0}")]
    ParameterType(String),

    #[error("query exceeded the {}s timeout", .0.as_secs())]
    Timeout(Duration),

    #[error("data store unavailable")]
    Unavailable,

    #[error("query execution failed")]
    Store { sqlstate: Option<String> },
}

impl ExecutionError {
    fn from_store(e: StoreError, timeout: Duration) -> Self {
        match e {
            StoreError::Timeout => Self::Timeout(timeout),
            StoreError::Unavailable(_) => Self::Unavailable,
            StoreError::Statement { sqlstate, .. } => Self::Store { sqlstate },
            StoreError::Binding(msg) => Self::ParameterType(msg),
            StoreError::Decode(_) => Self::Store { sqlstate: None },
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        match &e {
            ExecutionError::Binding(inner) => ApiError::invalid_parameters(inner.to_string()),
            ExecutionError::ParameterType(msg) => ApiError::invalid_parameters(msg.clone()),
            ExecutionError::Store {
                sqlstate: Some(code),
            } => ApiError::execution_failed(format!("Query execution failed (SQLSTATE {code})")),
            ExecutionError::Timeout(_) | ExecutionError::Unavailable | ExecutionError::Store { .. } => {
                let mut message = e.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                ApiError::execution_failed(message)
            }
        }
    }
}

/// Strip trailing semicolons and append `LIMIT max_rows` unless the text
/// already carries a `LIMIT` token.
pub fn apply_row_cap(sql: &str, max_rows: usize) -> String {
    let trimmed = sql
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if LIMIT_TOKEN.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed} LIMIT {max_rows}")
    }
}

pub struct ExecutionEngine {
    store: Arc<dyn QueryStore>,
    stats: Arc<StatsRecorder>,
    max_rows: usize,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn QueryStore>, stats: Arc<StatsRecorder>, max_rows: usize) -> Self {
        Self {
            store,
            stats,
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Run a validated query. Every call is reported to the stats recorder
    /// exactly once, whatever the outcome. No retries.
    pub async fn run(
        &self,
        query: &ValidatedQuery,
        hash: &QueryHash,
        parameters: &QueryParameters,
        timeout: Duration,
        want_explain: bool,
    ) -> Result<Execution, ExecutionError> {
        let started = Instant::now();
        let outcome = self.execute(query, parameters, timeout, want_explain).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &outcome {
            Ok(execution) => {
                self.stats
                    .record(true, false, execution.execution_time_ms)
                    .await;
                self.stats
                    .observe_slow_query(hash, query.as_str(), execution.execution_time_ms);
                debug!(
                    query_hash = %hash,
                    rows = execution.rows.len(),
                    elapsed_ms = execution.execution_time_ms,
                    "Query executed"
                );
            }
            Err(e) => {
                self.stats.record(false, false, elapsed_ms).await;
                error!(query_hash = %hash, error = ?e, elapsed_ms = round2(elapsed_ms), "Query execution failed");
            }
        }

        outcome
    }

    async fn execute(
        &self,
        query: &ValidatedQuery,
        parameters: &QueryParameters,
        timeout: Duration,
        want_explain: bool,
    ) -> Result<Execution, ExecutionError> {
        let bound = bind(query.as_str(), parameters)?;
        let limited = apply_row_cap(&bound.sql, self.max_rows);

        let dispatched = Instant::now();
        let mut rows = self
            .guarded(
                timeout,
                self.store
                    .fetch_rows(&limited, &bound.params, Some(self.max_rows), timeout),
            )
            .await?;

        let explain_plan = if want_explain {
            let remaining = timeout.saturating_sub(dispatched.elapsed());
            if remaining.is_zero() {
                return Err(ExecutionError::Timeout(timeout));
            }
            let explain_sql = format!("EXPLAIN (FORMAT JSON) {limited}");
            Some(
                self.guarded(remaining, self.store.explain(&explain_sql, &bound.params, remaining))
                    .await?,
            )
        } else {
            None
        };
        let execution_time_ms = round2(dispatched.elapsed().as_secs_f64() * 1000.0);

        if rows.len() > self.max_rows {
            warn!(
                returned = rows.len(),
                max_rows = self.max_rows,
                "Truncating result to row cap"
            );
            rows.truncate(self.max_rows);
        }

        Ok(Execution {
            rows,
            execution_time_ms,
            explain_plan,
        })
    }

    async fn guarded<T, F>(&self, timeout: Duration, op: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(timeout + STORE_GRACE, op).await {
            Ok(result) => {
                result.map_err(|e| {
                    error!(error = %e, "Store reported failure");
                    ExecutionError::from_store(e, timeout)
                })
            }
            Err(_) => Err(ExecutionError::Timeout(timeout)),
        }
    }
}
