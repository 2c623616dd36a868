//! Query gateway service: HTTP surface and server lifecycle.
//!
//! | Route | Auth | Handler |
//! |-------|------|---------|
//! | `POST /query` | bearer | validate, serve from cache or execute |
//! | `GET /schema` | bearer | allow-listed catalog |
//! | `GET /table/:name` | bearer | one table's columns, indexes, constraints |
//! | `GET /stats` | bearer | aggregate execution statistics |
//! | `GET /health` | none | store and cache reachability |

use crate::domain::{ApiError, GatewayConfig, GatewayError, Identity, QueryRequest, QueryResult};
use crate::middleware::MiddlewareStack;
use crate::ports::IdentityVerifier;
use crate::query::{Collaborators, Gateway};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

/// Query gateway service state
pub struct QueryGatewayService {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    middleware: MiddlewareStack,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), std::io::Error>>>,
}

impl QueryGatewayService {
    /// Create a new query gateway service
    pub fn new(
        config: GatewayConfig,
        deps: Collaborators,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, GatewayError> {
        let gateway = Arc::new(Gateway::new(&config, deps)?);
        let middleware = MiddlewareStack::from_config(&config, verifier);

        Ok(Self {
            config,
            gateway,
            middleware,
            shutdown_tx: None,
            server: None,
        })
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    /// Router with every route and the full middleware stack
    pub fn router(&self) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(self.middleware.tracing.clone())
            .layer(self.middleware.cors.clone())
            .layer(self.middleware.validation)
            .layer(self.middleware.auth.clone());

        Router::new()
            .route("/query", post(handle_query))
            .route("/schema", get(handle_schema))
            .route("/table/:name", get(handle_table))
            .route("/stats", get(handle_stats))
            .route("/health", get(handle_health))
            .fallback(handle_not_found)
            .layer(middleware)
            .with_state(Arc::clone(&self.gateway))
    }

    /// Bind the listener and serve in the background. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        if self.server.is_some() {
            return Err(GatewayError::Internal("server already started".into()));
        }

        let listener = tokio::net::TcpListener::bind(self.config.http_addr())
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", self.config.http_addr(), e)))?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let router = self.router();
        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        }));

        info!(addr = %addr, "Query gateway listening");
        Ok(addr)
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the server task to finish after [`shutdown`](Self::shutdown).
    pub async fn wait(&mut self) -> Result<(), GatewayError> {
        let Some(handle) = self.server.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => {
                info!("Query gateway stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server error");
                Err(GatewayError::Internal(e.to_string()))
            }
            Err(e) => Err(GatewayError::Internal(format!("server task failed: {e}"))),
        }
    }
}

async fn handle_query(
    State(gateway): State<Arc<Gateway>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "Malformed query request");
        ApiError::invalid_request(e.body_text())
    })?;

    let result = gateway.execute(&identity, request).await?;
    Ok(Json(result))
}

async fn handle_schema(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    gateway.schema().await.map(Json).map_err(ApiError::from)
}

async fn handle_table(
    State(gateway): State<Arc<Gateway>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    gateway
        .describe_table(&name)
        .await
        .map(Json)
        .map_err(ApiError::from)
}

async fn handle_stats(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    gateway.stats().await.map(Json).map_err(ApiError::from)
}

/// Health check endpoint. 503 when either dependency is unreachable.
async fn handle_health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let report = gateway.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn handle_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path())
}
