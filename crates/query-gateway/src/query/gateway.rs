//! Request orchestration.
//!
//! A query request moves through these states, never revisiting one:
//!
//! ```text
//! Received ─► Rejected (400)
//!    │
//!    ▼
//! Validated ─► CacheHit ─────────────────────────────► Responded
//!    │
//!    ▼
//! CacheMiss ─► ExecutionFailed (400/500)
//!    │
//!    ▼
//! Executed ─► Cached ─► Responded
//! ```
//!
//! Rejected requests touch neither the cache nor the store and are not
//! counted in statistics.

use crate::domain::{
    derive_key, ApiError, DependencyStatus, GatewayConfig, GatewayError, HealthReport, Identity,
    LimitsConfig, QueryRequest, QueryResult, QueryValidator, Rejection, SchemaInfo, StatsView,
    TableSchema,
};
use crate::ports::{CacheBackend, CounterStore, QueryStore, TimeSource};
use crate::query::cache::CacheStore;
use crate::query::engine::{ExecutionEngine, ExecutionError};
use crate::query::schema::{SchemaError, SchemaIntrospector};
use crate::query::stats::{StatsError, StatsRecorder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Upper bound on each dependency probe in a health check.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything with I/O the gateway talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn QueryStore>,
    pub cache: Arc<dyn CacheBackend>,
    pub counters: Arc<dyn CounterStore>,
    pub clock: Arc<dyn TimeSource>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rejected by policy: {0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidRequest(details) => ApiError::invalid_request(details),
            QueryError::Rejected(_) => ApiError::query_rejected(),
            QueryError::Execution(inner) => inner.into(),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        error!(error = %e, "Statistics unavailable");
        ApiError::internal("Failed to retrieve statistics")
    }
}

/// Per-request options after defaults and bounds are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestOptions {
    timeout: Duration,
    cache_ttl: Duration,
}

pub struct Gateway {
    validator: QueryValidator,
    cache: CacheStore,
    engine: ExecutionEngine,
    introspector: SchemaIntrospector,
    stats: Arc<StatsRecorder>,
    store: Arc<dyn QueryStore>,
    clock: Arc<dyn TimeSource>,
    limits: LimitsConfig,
    default_ttl: Duration,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, deps: Collaborators) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let validator =
            QueryValidator::new(&config.policy).map_err(|e| GatewayError::Config(e.to_string()))?;
        let stats = Arc::new(StatsRecorder::new(
            deps.counters,
            Arc::clone(&deps.clock),
            &config.stats,
        ));

        Ok(Self {
            validator,
            cache: CacheStore::new(deps.cache, &config.cache),
            engine: ExecutionEngine::new(
                Arc::clone(&deps.store),
                Arc::clone(&stats),
                config.limits.max_rows,
            ),
            introspector: SchemaIntrospector::new(
                Arc::clone(&deps.store),
                &config.policy,
                config.limits.default_timeout,
            ),
            stats,
            store: deps.store,
            clock: deps.clock,
            limits: config.limits.clone(),
            default_ttl: config.cache.default_ttl,
        })
    }

    /// Validate, serve from cache or execute, then cache and count.
    pub async fn execute(
        &self,
        identity: &Identity,
        request: QueryRequest,
    ) -> Result<QueryResult, QueryError> {
        let span = info_span!(
            "query",
            user_id = %identity.user_id,
            query_hash = tracing::field::Empty,
        );
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: QueryRequest) -> Result<QueryResult, QueryError> {
        let options = self.options(&request)?;
        let validated = self
            .validator
            .admit(&request.query)
            .map_err(QueryError::Rejected)?;

        let hash = derive_key(validated.as_str(), &request.parameters);
        tracing::Span::current().record("query_hash", tracing::field::display(&hash));

        if let Some(mut hit) = self.cache.get_result(&hash).await {
            if !request.explain || hit.explain_plan.is_some() {
                hit.cached = true;
                hit.timestamp = self.clock.now();
                if !request.explain {
                    hit.explain_plan = None;
                }
                self.stats.record(false, true, 0.0).await;
                debug!(rows = hit.row_count, "Cache hit");
                return Ok(hit);
            }
            debug!("Cached entry has no plan, executing for explain");
        }

        let execution = self
            .engine
            .run(
                &validated,
                &hash,
                &request.parameters,
                options.timeout,
                request.explain,
            )
            .await?;

        let result = QueryResult {
            row_count: execution.rows.len(),
            data: execution.rows,
            execution_time_ms: execution.execution_time_ms,
            cached: false,
            explain_plan: execution.explain_plan,
            query_hash: hash,
            timestamp: self.clock.now(),
        };

        self.cache.put_result(&result, options.cache_ttl).await;
        info!(
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "Query served"
        );
        Ok(result)
    }

    fn options(&self, request: &QueryRequest) -> Result<RequestOptions, QueryError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(QueryError::InvalidRequest("query cannot be empty".into()));
        }
        let length = query.chars().count();
        if length > self.limits.max_query_length {
            return Err(QueryError::InvalidRequest(format!(
                "query length {} exceeds limit {}",
                length, self.limits.max_query_length
            )));
        }

        let max_timeout = self.limits.max_timeout.as_secs();
        let timeout = match request.timeout {
            None => self.limits.default_timeout,
            Some(secs) if secs == 0 || secs > max_timeout => {
                return Err(QueryError::InvalidRequest(format!(
                    "timeout must be between 1 and {max_timeout} seconds"
                )));
            }
            Some(secs) => Duration::from_secs(secs),
        };

        let cache_ttl = match request.cache_ttl {
            None | Some(0) => self.default_ttl,
            Some(secs) => Duration::from_secs(secs),
        };

        Ok(RequestOptions { timeout, cache_ttl })
    }

    pub async fn schema(&self) -> Result<SchemaInfo, SchemaError> {
        self.introspector.list_schema().await
    }

    pub async fn describe_table(&self, name: &str) -> Result<TableSchema, SchemaError> {
        self.introspector.describe_table(name).await
    }

    pub async fn stats(&self) -> Result<StatsView, StatsError> {
        self.stats.snapshot().await
    }

    /// Probe the store and the cache concurrently.
    pub async fn health(&self) -> HealthReport {
        let (store, cache) = tokio::join!(
            tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.store.ping()),
            self.cache.ping(),
        );

        let database = match store {
            Ok(Ok(())) => DependencyStatus::Connected,
            Ok(Err(e)) => {
                warn!(error = %e, "Health probe: store unreachable");
                DependencyStatus::Unavailable
            }
            Err(_) => {
                warn!("Health probe: store ping timed out");
                DependencyStatus::Unavailable
            }
        };
        let cache = match cache {
            Ok(()) => DependencyStatus::Connected,
            Err(e) => {
                warn!(error = %e, "Health probe: cache unreachable");
                DependencyStatus::Unavailable
            }
        };

        let healthy =
            database == DependencyStatus::Connected && cache == DependencyStatus::Connected;
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: self.clock.now(),
            database,
            cache,
            version: crate::VERSION.to_string(),
        }
    }
}
