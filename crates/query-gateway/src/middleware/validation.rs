//! Request size validation.
//!
//! Rejects bodies above `http.max_request_size` with 413 before any handler
//! deserializes them.

use crate::domain::{codes, kinds, ApiError};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

/// Validation layer configuration
#[derive(Clone, Copy)]
pub struct ValidationLayer {
    max_request_size: usize,
}

impl ValidationLayer {
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }
}

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            max_request_size: self.max_request_size,
        }
    }
}

/// Validation service
#[derive(Clone)]
pub struct ValidationService<S> {
    inner: S,
    max_request_size: usize,
}

impl<S> Service<Request<Body>> for ValidationService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let max = self.max_request_size;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // fast path on the declared length
            if let Some(len) = declared_length(&req) {
                if len > max {
                    warn!(size = len, max, "Request too large (from header)");
                    return Ok(ApiError::payload_too_large(len, max).into_response());
                }
            }

            if req.method() != axum::http::Method::POST {
                return inner.call(req).await;
            }

            let (parts, body) = req.into_parts();
            let body_bytes = match read_body_with_limit(body, max).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Failed to read request body");
                    return Ok(e.into_response());
                }
            };

            let req = Request::from_parts(parts, Body::from(body_bytes));
            inner.call(req).await
        })
    }
}

fn declared_length<B>(req: &Request<B>) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Read body with size limit
async fn read_body_with_limit(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    to_bytes(body, max_size).await.map_err(|_| {
        ApiError::new(
            codes::PAYLOAD_TOO_LARGE,
            kinds::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds limit {max_size}"),
        )
    })
}
