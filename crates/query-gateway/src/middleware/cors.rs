//! CORS middleware.
//!
//! Wrapper around tower-http CORS with gateway configuration.

use crate::domain::CorsConfig;
use crate::middleware::tracing::REQUEST_ID_HEADER;
use axum::http::{HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer as TowerCorsLayer};
use tracing::warn;

/// Create CORS layer from gateway config
pub fn create_cors_layer(config: &CorsConfig) -> TowerCorsLayer {
    if !config.enabled {
        // no CORS headers at all; browsers fall back to same-origin
        return TowerCorsLayer::new();
    }

    let mut cors = TowerCorsLayer::new();
    let wildcard_origin = config.allowed_origins.iter().any(|o| o == "*");

    if wildcard_origin {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    cors = cors.allow_methods(methods);

    let wildcard_headers = config.allowed_headers.iter().any(|h| h == "*");
    if wildcard_headers {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    cors = cors
        .expose_headers([REQUEST_ID_HEADER])
        .max_age(Duration::from_secs(config.max_age));

    // tower-http refuses credentials alongside wildcards
    if config.allow_credentials {
        if wildcard_origin || wildcard_headers {
            warn!("CORS credentials disabled: not allowed with wildcard origins or headers");
        } else {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}
