//! Middleware stack for the query gateway.
//!
//! Layer order: Request → Tracing → CORS → Validation → Auth → Handler

pub mod auth;
pub mod cors;
pub mod tracing;
pub mod validation;

pub use auth::{constant_time_compare, AuthError, AuthLayer, PUBLIC_PATHS};
pub use cors::create_cors_layer;
pub use tracing::{TracingLayer, REQUEST_ID_HEADER};
pub use validation::ValidationLayer;

use crate::domain::GatewayConfig;
use crate::ports::IdentityVerifier;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Middleware stack builder
#[derive(Clone)]
pub struct MiddlewareStack {
    pub tracing: TracingLayer,
    pub cors: CorsLayer,
    pub validation: ValidationLayer,
    pub auth: AuthLayer,
}

impl MiddlewareStack {
    /// Create middleware stack from gateway config
    pub fn from_config(config: &GatewayConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            tracing: TracingLayer::new(),
            cors: create_cors_layer(&config.cors),
            validation: ValidationLayer::new(config.http.max_request_size),
            auth: AuthLayer::new(verifier),
        }
    }
}
