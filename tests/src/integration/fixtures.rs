//! Shared fixtures: a scripted store, a switchable cache and a router harness.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use query_gateway::adapters::{MemoryCache, MemoryCounters, StaticTokenVerifier};
use query_gateway::domain::{AuthConfig, CacheError, SqlParam, StoreError, TokenGrant};
use query_gateway::ports::SystemTimeSource;
use query_gateway::{
    CacheBackend, Collaborators, GatewayConfig, QueryGatewayService, QueryStore, Row,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const TOKEN: &str = "integration-token";

// =============================================================================
// TEST FIXTURES
// =============================================================================

type Script = Box<dyn Fn(&str, &[SqlParam]) -> Result<Vec<Row>, StoreError> + Send + Sync>;

/// Query store answering from a script and recording every statement
pub struct ScriptedStore {
    script: Script,
    delay: Mutex<Option<Duration>>,
    reachable: AtomicBool,
    calls: Mutex<Vec<(String, Vec<SqlParam>)>>,
}

impl ScriptedStore {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &[SqlParam]) -> Result<Vec<Row>, StoreError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Mutex::new(None),
            reachable: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every statement returns `rows`.
    pub fn rows(rows: Vec<Value>) -> Self {
        let rows: Vec<Row> = rows.into_iter().map(as_row).collect();
        Self::new(move |_, _| Ok(rows.clone()))
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl QueryStore for ScriptedStore {
    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[SqlParam],
        _row_limit: Option<usize>,
        timeout: Duration,
    ) -> Result<Vec<Row>, StoreError> {
        self.calls.lock().push((sql.to_string(), params.to_vec()));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(StoreError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }
        (self.script)(sql, params)
    }

    async fn explain(
        &self,
        _sql: &str,
        _params: &[SqlParam],
        _timeout: Duration,
    ) -> Result<Value, StoreError> {
        Ok(json!([{"Plan": {"Node Type": "Seq Scan", "Relation Name": "users"}}]))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }
}

/// In-memory cache that can be switched off to simulate an outage
#[derive(Default)]
pub struct SwitchableCache {
    inner: MemoryCache,
    down: AtomicBool,
}

impl SwitchableCache {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for SwitchableCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }
}

pub fn as_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {other}"),
    }
}

/// Router plus handles on its collaborators
pub struct Harness {
    pub router: Router,
    pub store: Arc<ScriptedStore>,
    pub cache: Arc<SwitchableCache>,
}

impl Harness {
    pub fn new(store: ScriptedStore) -> Self {
        Self::with_config(store, GatewayConfig::default())
    }

    pub fn with_config(store: ScriptedStore, config: GatewayConfig) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(SwitchableCache::default());
        let verifier = StaticTokenVerifier::new(&AuthConfig {
            tokens: vec![TokenGrant {
                token: TOKEN.to_string(),
                user_id: "analyst-1".to_string(),
                company_id: Some("acme".to_string()),
            }],
        });

        let service = QueryGatewayService::new(
            config,
            Collaborators {
                store: store.clone(),
                cache: cache.clone(),
                counters: Arc::new(MemoryCounters::new()),
                clock: Arc::new(SystemTimeSource),
            },
            Arc::new(verifier),
        )
        .expect("default configuration is valid");

        Self {
            router: service.router(),
            store,
            cache,
        }
    }

    /// Authenticated `POST /query`
    pub async fn query(&self, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post("/query")
                .header("Authorization", format!("Bearer {TOKEN}"))
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Authenticated `GET`
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(path)
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
