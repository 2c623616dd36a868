//! Bearer token authentication.
//!
//! Every route except the public ones requires `Authorization: Bearer <token>`.
//! The verified [`Identity`] is attached to the request extensions for handlers.

use crate::domain::{ApiError, Identity};
use crate::ports::IdentityVerifier;
use axum::{
    body::Body,
    http::{header, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Paths served without credentials
pub const PUBLIC_PATHS: &[&str] = &["/health"];

/// Why a request was refused before reaching a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer credentials")]
    MissingCredentials,

    #[error("token not recognized")]
    InvalidToken,
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::unauthorized()
    }
}

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    verifier: Arc<dyn IdentityVerifier>,
}

impl AuthLayer {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            verifier: Arc::clone(&self.verifier),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    verifier: Arc<dyn IdentityVerifier>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let verifier = Arc::clone(&self.verifier);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if PUBLIC_PATHS.contains(&req.uri().path()) {
                return inner.call(req).await;
            }

            let identity = match bearer_token(&req) {
                Some(token) => verifier.verify(&token).await.ok_or(AuthError::InvalidToken),
                None => Err(AuthError::MissingCredentials),
            };

            match identity {
                Ok(identity) => {
                    debug!(user_id = %identity.user_id, "Authenticated request");
                    req.extensions_mut().insert::<Identity>(identity);
                    inner.call(req).await
                }
                Err(e) => {
                    warn!(path = %req.uri().path(), reason = %e, "Rejected request without valid credentials");
                    Ok(ApiError::from(e).into_response())
                }
            }
        })
    }
}

/// Token from an `Authorization: Bearer` header. The scheme is case-insensitive.
fn bearer_token<B>(req: &Request<B>) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Constant-time string comparison.
///
/// Runs in time dependent only on the longer input's length, not on how many
/// leading bytes match.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    // different pad bytes so unequal lengths never compare equal
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
