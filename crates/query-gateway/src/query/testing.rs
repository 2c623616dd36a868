//! Scripted store for unit tests.

use crate::domain::{Row, SqlParam, StoreError};
use crate::ports::QueryStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::time::Duration;

type Responder = Box<dyn Fn(&str, &[SqlParam]) -> Result<Vec<Row>, StoreError> + Send + Sync>;

pub(crate) fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {other}"),
    }
}

pub(crate) struct FakeStore {
    responder: Responder,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<SqlParam>)>>,
    row_limits: Mutex<Vec<Option<usize>>>,
    explained: Mutex<Vec<String>>,
}

impl FakeStore {
    pub(crate) fn responding<F>(responder: F) -> Self
    where
        F: Fn(&str, &[SqlParam]) -> Result<Vec<Row>, StoreError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
            row_limits: Mutex::new(Vec::new()),
            explained: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn returning(rows: Vec<Row>) -> Self {
        Self::responding(move |_, _| Ok(rows.clone()))
    }

    pub(crate) fn failing(error: StoreError) -> Self {
        Self::responding(move |_, _| Err(error.clone()))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.calls.lock().clone()
    }

    pub(crate) fn row_limits(&self) -> Vec<Option<usize>> {
        self.row_limits.lock().clone()
    }

    pub(crate) fn explained(&self) -> Vec<String> {
        self.explained.lock().clone()
    }
}

#[async_trait]
impl QueryStore for FakeStore {
    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[SqlParam],
        row_limit: Option<usize>,
        _timeout: Duration,
    ) -> Result<Vec<Row>, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push((sql.to_string(), params.to_vec()));
        self.row_limits.lock().push(row_limit);
        (self.responder)(sql, params)
    }

    async fn explain(
        &self,
        sql: &str,
        _params: &[SqlParam],
        _timeout: Duration,
    ) -> Result<Value, StoreError> {
        self.explained.lock().push(sql.to_string());
        Ok(json!([{"Plan": {"Node Type": "Seq Scan"}}]))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
