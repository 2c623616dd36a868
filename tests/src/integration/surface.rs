//! # Read Surface
//!
//! Schema reflection, statistics, health and the request guards that sit in
//! front of every route.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{as_row, Harness, ScriptedStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use query_gateway::domain::{SqlParam, StoreError};
    use query_gateway::GatewayConfig;
    use serde_json::json;

    /// Store answering catalog queries with a mix of allowed and hidden objects
    fn catalog() -> ScriptedStore {
        ScriptedStore::new(|sql, _| {
            let rows = if sql.contains("information_schema.tables") {
                vec![
                    json!({"table_name": "jobs", "table_type": "BASE TABLE"}),
                    json!({"table_name": "users", "table_type": "BASE TABLE"}),
                    json!({"table_name": "api_keys", "table_type": "BASE TABLE"}),
                ]
            } else if sql.contains("information_schema.views") {
                vec![json!({"view_name": "admin_audit", "view_definition": "SELECT 1"})]
            } else if sql.contains("information_schema.routines") {
                vec![
                    json!({"routine_name": "count", "routine_type": "FUNCTION"}),
                    json!({"routine_name": "pg_terminate_backend", "routine_type": "FUNCTION"}),
                ]
            } else if sql.contains("information_schema.columns") {
                vec![
                    json!({
                        "column_name": "id", "data_type": "integer", "is_nullable": "NO",
                        "column_default": null, "character_maximum_length": null,
                        "numeric_precision": 32, "numeric_scale": 0
                    }),
                    json!({
                        "column_name": "email", "data_type": "character varying",
                        "is_nullable": "YES", "column_default": null,
                        "character_maximum_length": 255, "numeric_precision": null,
                        "numeric_scale": null
                    }),
                ]
            } else if sql.contains("table_constraints") {
                vec![json!({"constraint_name": "users_pkey", "constraint_type": "PRIMARY KEY"})]
            } else if sql.contains("reltuples") {
                vec![json!({"row_count": 1200})]
            } else if sql.contains("tablename = ANY") {
                vec![
                    json!({"indexname": "users_pkey", "tablename": "users", "indexdef": "CREATE UNIQUE INDEX users_pkey ON public.users USING btree (id)"}),
                    json!({"indexname": "api_keys_pkey", "tablename": "api_keys", "indexdef": "CREATE UNIQUE INDEX api_keys_pkey ON public.api_keys USING btree (id)"}),
                ]
            } else if sql.contains("pg_indexes") {
                vec![json!({"indexname": "users_pkey", "indexdef": "CREATE UNIQUE INDEX users_pkey ON public.users USING btree (id)"})]
            } else {
                vec![]
            };
            Ok(rows.into_iter().map(as_row).collect())
        })
    }

    // =============================================================================
    // SCHEMA
    // =============================================================================

    #[tokio::test]
    async fn test_schema_limited_to_allow_lists() {
        let harness = Harness::new(catalog());

        let (status, body) = harness.get("/schema").await;

        assert_eq!(status, StatusCode::OK);
        let tables: Vec<&str> = body["tables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["table_name"].as_str().unwrap())
            .collect();
        assert_eq!(tables, vec!["jobs", "users"]);
        assert!(body["views"].as_array().unwrap().is_empty());
        assert_eq!(body["functions"].as_array().unwrap().len(), 1);
        assert_eq!(body["functions"][0]["routine_name"], "count");
        assert_eq!(body["indexes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_schema_catalog_queries_are_parameterized() {
        let harness = Harness::new(catalog());

        harness.get("/schema").await;

        let calls = harness.store.calls();
        assert_eq!(calls.len(), 4);
        for (sql, params) in &calls {
            assert!(sql.contains("$1"), "{sql}");
            assert_eq!(params[0], SqlParam::Text("public".into()));
        }
    }

    #[tokio::test]
    async fn test_describe_allowed_table() {
        let harness = Harness::new(catalog());

        let (status, body) = harness.get("/table/Users").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["table_name"], "users");
        assert_eq!(body["columns"].as_array().unwrap().len(), 2);
        assert_eq!(body["columns"][0]["is_nullable"], false);
        assert_eq!(body["columns"][1]["character_maximum_length"], 255);
        assert_eq!(body["constraints"][0]["constraint_type"], "PRIMARY KEY");
        assert_eq!(body["indexes"][0]["indexname"], "users_pkey");
        assert_eq!(body["row_count"], 1200);
    }

    #[tokio::test]
    async fn test_describe_hidden_table_refused_before_catalog() {
        let harness = Harness::new(catalog());

        let (status, body) = harness.get("/table/api_keys").await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "access_denied");
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_generic_500() {
        let harness = Harness::new(ScriptedStore::new(|_, _| {
            Err(StoreError::Unavailable("connection reset by peer".into()))
        }));

        let (status, body) = harness.get("/schema").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to retrieve schema information");
    }

    // =============================================================================
    // STATS AND HEALTH
    // =============================================================================

    #[tokio::test]
    async fn test_stats_start_empty() {
        let harness = Harness::new(catalog());

        let (status, body) = harness.get("/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_queries"], 0);
        assert_eq!(body["cached_queries"], 0);
        assert_eq!(body["failed_queries"], 0);
        assert_eq!(body["avg_execution_time"], 0.0);
        assert_eq!(body["cache_hit_rate"], 0.0);
        assert_eq!(body["slow_queries"], json!([]));
    }

    #[tokio::test]
    async fn test_stats_require_credentials() {
        let harness = Harness::new(catalog());

        let (status, _) = harness
            .send(Request::get("/stats").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let harness = Harness::new(catalog());

        let (status, body) = harness
            .send(Request::get("/health").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["cache"], "connected");
        assert_eq!(body["version"], query_gateway::VERSION);
    }

    #[tokio::test]
    async fn test_health_reports_cache_outage() {
        let harness = Harness::new(catalog());
        harness.cache.set_down(true);

        let (status, body) = harness.get("/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["cache"], "unavailable");
    }

    #[tokio::test]
    async fn test_health_reports_database_outage() {
        let store = catalog();
        store.set_reachable(false);
        let harness = Harness::new(store);

        let (status, body) = harness.get("/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"], "unavailable");
        assert_eq!(body["cache"], "connected");
    }

    // =============================================================================
    // REQUEST GUARDS
    // =============================================================================

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = GatewayConfig::default();
        config.http.max_request_size = 64;
        let harness = Harness::with_config(catalog(), config);

        let query = format!("SELECT * FROM users WHERE email = '{}'", "a".repeat(128));
        let (status, body) = harness.query(json!({ "query": query })).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "payload_too_large");
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let harness = Harness::new(catalog());

        let (status, body) = harness.get("/admin/tokens").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = harness
            .send(Request::get("/admin/tokens").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_method_on_query() {
        let harness = Harness::new(catalog());

        let (status, _) = harness.get("/query").await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
