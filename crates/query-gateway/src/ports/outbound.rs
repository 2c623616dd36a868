//! Outbound ports for the query gateway.
//!
//! Every collaborator with I/O sits behind one of these traits and is injected
//! at construction.

use crate::domain::{CacheError, Identity, Row, SqlParam, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Relational store reached through a connection pool.
///
/// Implementations run each call in its own read-only transaction and abort
/// the statement once `timeout` elapses.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Run `sql` with `params` bound to `$1..$n` and return rows as ordered maps.
    ///
    /// With a `row_limit`, no more than that many rows leave the server,
    /// whatever limits the statement itself carries.
    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[SqlParam],
        row_limit: Option<usize>,
        timeout: Duration,
    ) -> Result<Vec<Row>, StoreError>;

    /// Return the JSON execution plan for `sql`.
    async fn explain(
        &self,
        sql: &str,
        params: &[SqlParam],
        timeout: Duration,
    ) -> Result<serde_json::Value, StoreError>;

    /// Cheap round trip proving a connection can be obtained.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Shared numeric counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `by` to an integer counter, creating it at zero.
    async fn increment(&self, key: &str, by: i64) -> Result<(), CacheError>;

    /// Add `by` to a floating point counter, creating it at zero.
    async fn increment_float(&self, key: &str, by: f64) -> Result<(), CacheError>;

    /// Read counters in order; absent keys come back as `None`.
    async fn read(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;
}

/// Maps a bearer token to a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `None` when the token is unknown, expired or malformed.
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
