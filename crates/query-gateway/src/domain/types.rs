//! Request, result and metadata types exchanged over the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One result row: column name to value, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Caller supplied parameters. Keys are unique and iterate in sorted order.
pub type QueryParameters = BTreeMap<String, serde_json::Value>;

/// Body of `POST /query`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    /// SQL text, read-only statements only
    pub query: String,
    /// Named (`:name`) or positional (`"1"`, `"2"`) parameters
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parameters: QueryParameters,
    /// Cache TTL in seconds; absent or 0 selects the configured default
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    /// Also return the store's execution plan
    #[serde(default)]
    pub explain: bool,
    /// Execution timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl QueryRequest {
    /// Request with default options.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: QueryParameters::new(),
            cache_ttl: None,
            explain: false,
            timeout: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<QueryParameters, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<QueryParameters>::deserialize(deserializer)?.unwrap_or_default())
}

/// SHA-256 digest of a query and its parameters, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a successful `POST /query`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub data: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub cached: bool,
    pub explain_plan: Option<serde_json::Value>,
    pub query_hash: QueryHash,
    pub timestamp: DateTime<Utc>,
}

/// Verified caller identity, produced by an `IdentityVerifier`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub company_id: Option<String>,
}

// ============================================================================
// Schema metadata
// ============================================================================

/// Body of `GET /schema`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub functions: Vec<FunctionInfo>,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableInfo {
    pub table_name: String,
    pub table_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewInfo {
    pub view_name: String,
    pub view_definition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionInfo {
    pub routine_name: String,
    pub routine_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexInfo {
    pub indexname: String,
    pub tablename: String,
    pub indexdef: String,
}

/// Body of `GET /table/{name}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<TableIndex>,
    pub constraints: Vec<ConstraintInfo>,
    /// Planner estimate; absent when the table was never analyzed
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    #[serde(deserialize_with = "yes_no")]
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableIndex {
    pub indexname: String,
    pub indexdef: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintInfo {
    pub constraint_name: String,
    pub constraint_type: String,
}

/// The catalog reports nullability as `YES`/`NO`; re-serialized output is a bool.
fn yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => Ok(s.eq_ignore_ascii_case("yes")),
    }
}

// ============================================================================
// Statistics and health
// ============================================================================

/// Body of `GET /stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsView {
    pub total_queries: u64,
    pub cached_queries: u64,
    pub failed_queries: u64,
    /// Cumulative execution time over total queries, milliseconds
    pub avg_execution_time: f64,
    /// Percentage of queries answered from cache
    pub cache_hit_rate: f64,
    pub slow_queries: Vec<SlowQuery>,
}

/// An execution that crossed the slow-query threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQuery {
    pub query_hash: QueryHash,
    pub query_preview: String,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Reachability of one dependency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Connected,
    Unavailable,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: DependencyStatus,
    pub cache: DependencyStatus,
    pub version: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database == DependencyStatus::Connected && self.cache == DependencyStatus::Connected
    }
}

/// Round to two decimal places for reporting.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
