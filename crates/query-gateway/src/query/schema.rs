//! Read-only reflection over allow-listed objects.
//!
//! Catalog queries bind the schema name and allow-lists as parameters, and the
//! rows are filtered again here, so nothing outside the allow-lists leaves the
//! gateway even if the catalog query were widened.

use crate::domain::{
    ApiError, ColumnInfo, ConstraintInfo, FunctionInfo, IndexInfo, PolicyConfig, Row, SchemaInfo,
    SqlParam, StoreError, TableIndex, TableInfo, TableSchema, ViewInfo,
};
use crate::ports::QueryStore;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const TABLES_SQL: &str = "SELECT table_name, table_type FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = ANY($2) ORDER BY table_name";

const VIEWS_SQL: &str = "SELECT table_name AS view_name, view_definition FROM information_schema.views \
     WHERE table_schema = $1 AND table_name = ANY($2) ORDER BY table_name";

const FUNCTIONS_SQL: &str = "SELECT routine_name, routine_type FROM information_schema.routines \
     WHERE routine_schema = $1 AND upper(routine_name) = ANY($2) ORDER BY routine_name";

const INDEXES_SQL: &str = "SELECT indexname, tablename, indexdef FROM pg_indexes \
     WHERE schemaname = $1 AND tablename = ANY($2) ORDER BY tablename, indexname";

const COLUMNS_SQL: &str = "SELECT column_name, data_type, is_nullable, column_default, \
     character_maximum_length, numeric_precision, numeric_scale \
     FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

const TABLE_INDEXES_SQL: &str = "SELECT indexname, indexdef FROM pg_indexes \
     WHERE schemaname = $1 AND tablename = $2 ORDER BY indexname";

const CONSTRAINTS_SQL: &str = "SELECT constraint_name, constraint_type \
     FROM information_schema.table_constraints \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY constraint_name";

const ROW_ESTIMATE_SQL: &str = "SELECT c.reltuples::bigint AS row_count FROM pg_class c \
     JOIN pg_namespace n ON n.oid = c.relnamespace WHERE n.nspname = $1 AND c.relname = $2";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("access to table '{0}' is not allowed")]
    AccessDenied(String),

    #[error("catalog query failed: {0}")]
    Store(#[from] StoreError),

    #[error("unexpected catalog row: {0}")]
    Decode(String),
}

impl From<SchemaError> for ApiError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::AccessDenied(_) => ApiError::access_denied(),
            SchemaError::Store(_) | SchemaError::Decode(_) => {
                ApiError::internal("Failed to retrieve schema information")
            }
        }
    }
}

pub struct SchemaIntrospector {
    store: Arc<dyn QueryStore>,
    schema: String,
    allowed_tables: BTreeSet<String>,
    allowed_functions: BTreeSet<String>,
    timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(store: Arc<dyn QueryStore>, policy: &PolicyConfig, timeout: Duration) -> Self {
        Self {
            store,
            schema: policy.schema.clone(),
            allowed_tables: policy
                .allowed_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            allowed_functions: policy
                .allowed_functions
                .iter()
                .map(|f| f.to_uppercase())
                .collect(),
            timeout,
        }
    }

    /// Tables, views, functions and indexes within the allow-lists.
    pub async fn list_schema(&self) -> Result<SchemaInfo, SchemaError> {
        let tables_param = [
            SqlParam::Text(self.schema.clone()),
            SqlParam::TextArray(self.allowed_tables.iter().cloned().collect()),
        ];
        let functions_param = [
            SqlParam::Text(self.schema.clone()),
            SqlParam::TextArray(self.allowed_functions.iter().cloned().collect()),
        ];

        let (tables, views, functions, indexes) = tokio::try_join!(
            self.catalog::<TableInfo>(TABLES_SQL, &tables_param),
            self.catalog::<ViewInfo>(VIEWS_SQL, &tables_param),
            self.catalog::<FunctionInfo>(FUNCTIONS_SQL, &functions_param),
            self.catalog::<IndexInfo>(INDEXES_SQL, &tables_param),
        )
        .inspect_err(|e| error!(error = %e, "Schema listing failed"))?;

        Ok(SchemaInfo {
            tables: tables
                .into_iter()
                .filter(|t| self.table_allowed(&t.table_name))
                .collect(),
            views: views
                .into_iter()
                .filter(|v| self.table_allowed(&v.view_name))
                .collect(),
            functions: functions
                .into_iter()
                .filter(|f| {
                    self.allowed_functions
                        .contains(&f.routine_name.to_uppercase())
                })
                .collect(),
            indexes: indexes
                .into_iter()
                .filter(|i| self.table_allowed(&i.tablename))
                .collect(),
        })
    }

    /// Columns, indexes, constraints and estimated row count for one table.
    ///
    /// Names outside the allow-list are refused before any catalog access.
    pub async fn describe_table(&self, name: &str) -> Result<TableSchema, SchemaError> {
        let table = name.to_lowercase();
        if !self.table_allowed(&table) {
            warn!(target: "query_gateway::audit", table = %table, "Describe refused for table outside allow-list");
            return Err(SchemaError::AccessDenied(table));
        }

        let params = [
            SqlParam::Text(self.schema.clone()),
            SqlParam::Text(table.clone()),
        ];

        let (columns, indexes, constraints, estimate) = tokio::try_join!(
            self.catalog::<ColumnInfo>(COLUMNS_SQL, &params),
            self.catalog::<TableIndex>(TABLE_INDEXES_SQL, &params),
            self.catalog::<ConstraintInfo>(CONSTRAINTS_SQL, &params),
            self.rows(ROW_ESTIMATE_SQL, &params),
        )
        .inspect_err(|e| error!(table = %table, error = %e, "Table description failed"))?;

        let row_count = estimate
            .first()
            .and_then(|r| r.get("row_count"))
            .and_then(|v| v.as_i64())
            .filter(|n| *n >= 0);

        Ok(TableSchema {
            table_name: table,
            columns,
            indexes,
            constraints,
            row_count,
        })
    }

    fn table_allowed(&self, name: &str) -> bool {
        self.allowed_tables.contains(&name.to_lowercase())
    }

    async fn rows(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, SchemaError> {
        Ok(self.store.fetch_rows(sql, params, None, self.timeout).await?)
    }

    async fn catalog<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<T>, SchemaError> {
        self.rows(sql, params)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(serde_json::Value::Object(row))
                    .map_err(|e| SchemaError::Decode(e.to_string()))
            })
            .collect()
    }
}
