//! # Query Flow
//!
//! `POST /query` end to end: policy, row cap, parameter binding, cache
//! behavior and statistics, observed through the HTTP surface and the
//! statements that reach the store.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{Harness, ScriptedStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use query_gateway::domain::{SqlParam, StoreError};
    use query_gateway::GatewayConfig;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn users() -> Vec<Value> {
        vec![
            json!({"id": 1, "email": "ada@example.com", "active": true}),
            json!({"id": 2, "email": "grace@example.com", "active": false}),
        ]
    }

    // =============================================================================
    // POLICY
    // =============================================================================

    #[tokio::test]
    async fn test_stacked_drop_rejected_without_touching_store() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness
            .query(json!({"query": "SELECT * FROM users; DROP TABLE users"}))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "query_rejected");
        assert_eq!(body["message"], "Query not allowed for security reasons");
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejections_share_one_message() {
        let harness = Harness::new(ScriptedStore::rows(users()));
        let attempts = [
            "SELECT * FROM secret_table",
            "SELECT * FROM users -- trailing",
            "SELECT * FROM users /* note */",
            "SELECT id FROM users UNION SELECT table_name FROM information_schema.tables",
            "DELETE FROM users",
            "EXPLAIN SELECT * FROM users",
            "SELECT u.id FROM users u JOIN payroll p ON p.user_id = u.id",
            "SELECT * FROM users, payroll",
            "SELECT * FROM users u JOIN jobs j ON TRUE, payroll p",
            "SELECT * FROM (payroll CROSS JOIN users)",
        ];

        for sql in attempts {
            let (status, body) = harness.query(json!({ "query": sql })).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{sql}");
            assert_eq!(body["message"], "Query not allowed for security reasons", "{sql}");
        }
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_shapes_reach_store() {
        let harness = Harness::new(ScriptedStore::rows(vec![]));
        let accepted = [
            "select count(*) from jobs",
            "WITH recent AS (SELECT * FROM jobs) SELECT * FROM recent",
            "SELECT EXTRACT(YEAR FROM created_at) FROM applications",
            "SELECT j.title FROM jobs j JOIN companies c ON c.id = j.company_id",
        ];

        for sql in accepted {
            let (status, _) = harness.query(json!({ "query": sql })).await;
            assert_eq!(status, StatusCode::OK, "{sql}");
        }
        assert_eq!(harness.store.calls().len(), accepted.len());
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness.query(json!({"query": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, _) = harness.query(json!({"sql": "SELECT 1"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = harness
            .query(json!({"query": "SELECT * FROM users", "timeout": 301}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(harness.store.calls().is_empty());
    }

    // =============================================================================
    // EXECUTION
    // =============================================================================

    #[tokio::test]
    async fn test_row_cap_appended_and_result_shape() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness
            .query(json!({"query": "SELECT id, email, active FROM users;"}))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], 2);
        assert_eq!(body["cached"], false);
        assert_eq!(body["data"][0]["email"], "ada@example.com");
        assert_eq!(body["query_hash"].as_str().unwrap().len(), 64);
        assert!(body["explain_plan"].is_null());

        let calls = harness.store.calls();
        assert_eq!(calls[0].0, "SELECT id, email, active FROM users LIMIT 10000");
    }

    #[tokio::test]
    async fn test_rows_truncated_to_configured_cap() {
        let rows = (0..25).map(|i| json!({ "id": i })).collect();
        let mut config = GatewayConfig::default();
        config.limits.max_rows = 10;
        let harness = Harness::with_config(ScriptedStore::rows(rows), config);

        let (status, body) = harness
            .query(json!({"query": "SELECT id FROM users LIMIT 500"}))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], 10);
        assert_eq!(body["data"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_named_parameters_bound_not_spliced() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, _) = harness
            .query(json!({
                "query": "SELECT * FROM users WHERE email = :email AND id > :min_id",
                "parameters": {"email": "x' OR '1'='1", "min_id": 0}
            }))
            .await;

        assert_eq!(status, StatusCode::OK);
        let (sql, params) = &harness.store.calls()[0];
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE email = $1 AND id > $2 LIMIT 10000"
        );
        assert_eq!(
            params,
            &vec![SqlParam::Text("x' OR '1'='1".into()), SqlParam::Int(0)]
        );
    }

    #[tokio::test]
    async fn test_positional_parameters() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, _) = harness
            .query(json!({
                "query": "SELECT * FROM users WHERE id = $1",
                "parameters": {"1": 2}
            }))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(harness.store.calls()[0].1, vec![SqlParam::Int(2)]);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_400() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness
            .query(json!({
                "query": "SELECT * FROM users WHERE id = :id",
                "parameters": {"user_id": 1}
            }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_parameters");
        assert!(body["message"].as_str().unwrap().contains("'id'"));
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_error_text_not_leaked() {
        let harness = Harness::new(ScriptedStore::new(|_, _| {
            Err(StoreError::Statement {
                sqlstate: Some("42703".into()),
                message: "column \"salary\" does not exist".into(),
            })
        }));

        let (status, body) = harness
            .query(json!({"query": "SELECT salary FROM users"}))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "execution_failed");
        assert!(!body["message"].as_str().unwrap().contains("salary"));
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let store = ScriptedStore::rows(users());
        store.set_delay(Duration::from_secs(5));
        let harness = Harness::new(store);

        let (status, body) = harness
            .query(json!({"query": "SELECT * FROM users", "timeout": 1}))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_explain_plan_returned() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness
            .query(json!({"query": "SELECT * FROM users", "explain": true}))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["explain_plan"][0]["Plan"]["Node Type"], "Seq Scan");
    }

    // =============================================================================
    // CACHE AND STATISTICS
    // =============================================================================

    #[tokio::test]
    async fn test_identical_query_served_from_cache() {
        let harness = Harness::new(ScriptedStore::rows(users()));
        let request = json!({"query": "SELECT * FROM users WHERE active = :active", "parameters": {"active": true}});

        let (_, first) = harness.query(request.clone()).await;
        let (status, second) = harness.query(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cached"], false);
        assert_eq!(second["cached"], true);
        assert_eq!(first["query_hash"], second["query_hash"]);
        assert_eq!(first["data"], second["data"]);
        assert_eq!(harness.store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_variants_share_cache_entry() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        harness.query(json!({"query": "SELECT * FROM users"})).await;
        let (_, body) = harness
            .query(json!({"query": "  SELECT * FROM users \n"}))
            .await;

        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_execution() {
        let harness = Harness::new(ScriptedStore::rows(users()));
        harness.cache.set_down(true);
        let request = json!({"query": "SELECT * FROM users"});

        let (first_status, first) = harness.query(request.clone()).await;
        let (second_status, second) = harness.query(request).await;

        assert_eq!(first_status, StatusCode::OK);
        assert_eq!(second_status, StatusCode::OK);
        assert_eq!(first["cached"], false);
        assert_eq!(second["cached"], false);
        assert_eq!(harness.store.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_stats_count_validated_requests_only() {
        let harness = Harness::new(ScriptedStore::rows(users()));
        let request = json!({"query": "SELECT * FROM users"});

        harness.query(request.clone()).await;
        harness.query(request).await;
        harness.query(json!({"query": "DROP TABLE users"})).await;
        harness
            .query(json!({"query": "SELECT * FROM users WHERE id = :id", "parameters": {"uid": 1}}))
            .await;

        let (status, stats) = harness.get("/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_queries"], 3);
        assert_eq!(stats["cached_queries"], 1);
        assert_eq!(stats["failed_queries"], 1);
        assert_eq!(stats["cache_hit_rate"], 33.33);
    }

    #[tokio::test]
    async fn test_unauthenticated_query_rejected() {
        let harness = Harness::new(ScriptedStore::rows(users()));

        let (status, body) = harness
            .send(
                Request::post("/query")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"query":"SELECT * FROM users"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = harness
            .send(
                Request::post("/query")
                    .header("Authorization", "Bearer wrong-token")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"query":"SELECT * FROM users"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(harness.store.calls().is_empty());
    }
}
