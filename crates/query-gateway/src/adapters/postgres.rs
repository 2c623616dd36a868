//! PostgreSQL query store over a deadpool connection pool.
//!
//! Each call checks out a connection, opens a `READ ONLY` transaction and
//! sets a transaction-local `statement_timeout`. Rows are produced by the
//! server as `row_to_json`, so column order and JSON typing follow
//! PostgreSQL's own rules. The row cap is applied on the wrapping statement,
//! so it holds whatever `LIMIT` the query text carries.
//!
//! Output column names must be unique: `SELECT u.id, j.id ...` needs aliases
//! (`u.id AS user_id`). A row with a repeated name fails to decode instead of
//! silently keeping one of the values.

use crate::domain::{DatabaseConfig, GatewayError, Row, SqlParam, StoreError};
use crate::ports::QueryStore;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{
    Client, Config as PoolSettings, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod,
    Runtime,
};
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, warn};

/// How long past the statement timeout the client waits before cancelling
/// from its side.
const CANCEL_GRACE: Duration = Duration::from_millis(250);

type BoxError = Box<dyn StdError + Sync + Send>;

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool. Connections are opened lazily on first checkout.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, GatewayError> {
        let mut pool_config = PoolConfig::new(config.max_connections);
        pool_config.timeouts.wait = Some(config.acquire_timeout);
        pool_config.timeouts.create = Some(config.connect_timeout);

        let mut settings = PoolSettings::new();
        settings.url = Some(config.url.clone());
        settings.connect_timeout = Some(config.connect_timeout);
        settings.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        settings.pool = Some(pool_config);

        let pool = settings
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| GatewayError::Dependency(format!("postgres pool: {e}")))?;

        Ok(Self { pool })
    }

    async fn checkout(&self) -> Result<Client, StoreError> {
        self.pool.get().await.map_err(|e| {
            warn!(error = %e, "Failed to obtain a database connection");
            pool_error(e)
        })
    }

    async fn read_only(
        &self,
        sql: &str,
        params: &[SqlParam],
        timeout: Duration,
    ) -> Result<Vec<tokio_postgres::Row>, StoreError> {
        let mut client = self.checkout().await?;
        let cancel = client.cancel_token();

        let binds: Vec<Bind<'_>> = params.iter().map(Bind).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            binds.iter().map(|b| b as &(dyn ToSql + Sync)).collect();
        let statement_timeout = timeout.as_millis().to_string();

        let work = async {
            let tx = client.build_transaction().read_only(true).start().await?;
            tx.execute(
                "SELECT set_config('statement_timeout', $1, true)",
                &[&statement_timeout],
            )
            .await?;
            let rows = tx.query(sql, &refs).await?;
            tx.commit().await?;
            Ok::<_, tokio_postgres::Error>(rows)
        };

        match tokio::time::timeout(timeout + CANCEL_GRACE, work).await {
            Ok(result) => result.map_err(store_error),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Statement outlived its timeout, cancelling"
                );
                tokio::spawn(async move {
                    if let Err(e) = cancel.cancel_query(NoTls).await {
                        warn!(error = %e, "Cancel request failed");
                    }
                });
                // detached from the pool, the connection may still be busy
                drop(Client::take(client));
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl QueryStore for PostgresStore {
    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[SqlParam],
        row_limit: Option<usize>,
        timeout: Duration,
    ) -> Result<Vec<Row>, StoreError> {
        let statement = row_statement(sql, row_limit);
        let rows = self.read_only(&statement, params, timeout).await?;
        debug!(rows = rows.len(), "Fetched rows");

        rows.iter()
            .map(|row| {
                let text: &str = row
                    .try_get(0)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                decode_row(text)
            })
            .collect()
    }

    async fn explain(
        &self,
        sql: &str,
        params: &[SqlParam],
        timeout: Duration,
    ) -> Result<Value, StoreError> {
        let rows = self.read_only(sql, params, timeout).await?;
        let first = rows
            .first()
            .ok_or_else(|| StoreError::Decode("EXPLAIN returned no rows".into()))?;
        first
            .try_get::<_, Value>(0)
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.checkout().await?;
        client.simple_query("SELECT 1").await.map_err(store_error)?;
        Ok(())
    }
}

/// Fold each row of `sql` into one JSON text value, at most `row_limit` of them.
fn row_statement(sql: &str, row_limit: Option<usize>) -> String {
    match row_limit {
        Some(limit) => format!("SELECT row_to_json(q)::text FROM ({sql}) AS q LIMIT {limit}"),
        None => format!("SELECT row_to_json(q)::text FROM ({sql}) AS q"),
    }
}

fn decode_row(text: &str) -> Result<Row, StoreError> {
    serde_json::from_str::<UniqueRow>(text)
        .map(|row| row.0)
        .map_err(|e| StoreError::Decode(e.to_string()))
}

/// A JSON object whose keys must not repeat
struct UniqueRow(Row);

impl<'de> Deserialize<'de> for UniqueRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = UniqueRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object per row")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut row = Row::new();
                while let Some((column, value)) = access.next_entry::<String, serde_json::Value>()? {
                    if row.contains_key(&column) {
                        return Err(de::Error::custom(format_args!(
                            "duplicate column name '{column}'; alias the columns so each name is unique"
                        )));
                    }
                    row.insert(column, value);
                }
                Ok(UniqueRow(row))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

fn pool_error(e: PoolError) -> StoreError {
    match e {
        PoolError::Timeout(_) => StoreError::Unavailable("connection pool exhausted".into()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn store_error(e: tokio_postgres::Error) -> StoreError {
    if let Some(db) = e.as_db_error() {
        if *db.code() == SqlState::QUERY_CANCELED {
            return StoreError::Timeout;
        }
        return StoreError::Statement {
            sqlstate: Some(db.code().code().to_string()),
            message: db.message().to_string(),
        };
    }
    if let Some(mismatch) = e
        .source()
        .and_then(|source| source.downcast_ref::<ParamTypeError>())
    {
        return StoreError::Binding(mismatch.to_string());
    }
    if e.is_closed() {
        return StoreError::Unavailable(e.to_string());
    }
    StoreError::Statement {
        sqlstate: None,
        message: e.to_string(),
    }
}

/// A bind value that cannot be encoded as the type the server inferred
#[derive(Debug)]
struct ParamTypeError(String);

impl fmt::Display for ParamTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for ParamTypeError {}

fn mismatch(value: &str, ty: &Type) -> BoxError {
    let hint = if *ty == Type::NUMERIC {
        ", cast the placeholder (e.g. $1::float8)"
    } else {
        ""
    };
    Box::new(ParamTypeError(format!(
        "{value} value cannot be bound as {}{hint}",
        ty.name()
    )))
}

fn invalid(value: &str, ty: &Type, reason: impl fmt::Display) -> BoxError {
    Box::new(ParamTypeError(format!(
        "'{value}' is not a valid {}: {reason}",
        ty.name()
    )))
}

/// Encodes a [`SqlParam`] as whatever type the server inferred for its placeholder.
#[derive(Debug)]
struct Bind<'a>(&'a SqlParam);

impl ToSql for Bind<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if is_json(ty) {
            return json_of(self.0).to_sql(ty, out);
        }
        match self.0 {
            SqlParam::Null => Ok(IsNull::Yes),
            SqlParam::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            SqlParam::Bool(_) => Err(mismatch("boolean", ty)),
            SqlParam::Int(i) => int_to_sql(*i, ty, out),
            SqlParam::Float(f) => float_to_sql(*f, ty, out),
            SqlParam::Text(s) => text_to_sql(s, ty, out),
            SqlParam::TextArray(items) if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY => {
                items.to_sql(ty, out)
            }
            SqlParam::TextArray(_) => Err(mismatch("array", ty)),
            SqlParam::Json(_) => Err(mismatch("object", ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn json_of(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::Null,
        SqlParam::Bool(b) => Value::Bool(*b),
        SqlParam::Int(i) => Value::from(*i),
        SqlParam::Float(f) => Value::from(*f),
        SqlParam::Text(s) => Value::String(s.clone()),
        SqlParam::TextArray(items) => Value::from(items.clone()),
        SqlParam::Json(v) => v.clone(),
    }
}

fn int_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(v)
            .map_err(|e| invalid(&v.to_string(), ty, e))?
            .to_sql(ty, out)
    } else if *ty == Type::INT2 {
        i16::try_from(v)
            .map_err(|e| invalid(&v.to_string(), ty, e))?
            .to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (v as f64).to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if is_textual(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("integer", ty))
    }
}

fn float_to_sql(v: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if is_textual(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("float", ty))
    }
}

fn is_textual(ty: &Type) -> bool {
    *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_textual(ty) {
        s.to_sql(ty, out)
    } else if *ty == Type::UUID {
        uuid::Uuid::parse_str(s)
            .map_err(|e| invalid(s, ty, e))?
            .to_sql(ty, out)
    } else if *ty == Type::DATE {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| invalid(s, ty, e))?
            .to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        parse_naive_timestamp(s)
            .ok_or_else(|| invalid(s, ty, "expected YYYY-MM-DD[ HH:MM:SS]"))?
            .to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        let parsed = DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_naive_timestamp(s).map(|naive| naive.and_utc()))
            .ok_or_else(|| invalid(s, ty, "expected an RFC 3339 timestamp"))?;
        parsed.to_sql(ty, out)
    } else if *ty == Type::INT8 || *ty == Type::INT4 || *ty == Type::INT2 {
        let parsed: i64 = s.trim().parse().map_err(|e| invalid(s, ty, e))?;
        int_to_sql(parsed, ty, out)
    } else if *ty == Type::FLOAT8 || *ty == Type::FLOAT4 {
        let parsed: f64 = s.trim().parse().map_err(|e| invalid(s, ty, e))?;
        float_to_sql(parsed, ty, out)
    } else if *ty == Type::BOOL {
        let parsed: bool = s.trim().parse().map_err(|e| invalid(s, ty, e))?;
        parsed.to_sql(ty, out)
    } else {
        Err(mismatch("string", ty))
    }
}

fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
