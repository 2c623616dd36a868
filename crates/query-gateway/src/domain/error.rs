//! Gateway error types.
//!
//! Every failure that reaches a caller is rendered as an [`ApiError`]: an HTTP
//! status, a stable machine-readable kind, and a message that never carries
//! raw store text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP status codes used by the gateway
pub mod codes {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const INTERNAL_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Stable error kinds carried in the `error` field of the response body
pub mod kinds {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const QUERY_REJECTED: &str = "query_rejected";
    pub const INVALID_PARAMETERS: &str = "invalid_parameters";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const EXECUTION_FAILED: &str = "execution_failed";
    pub const INTERNAL: &str = "internal_error";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
}

/// Caller-facing error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Machine readable kind
    pub kind: &'static str,
    /// Caller-safe message
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// Malformed request body or options
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(codes::BAD_REQUEST, kinds::INVALID_REQUEST, details)
    }

    /// Policy rejection. The specific reason is logged, never returned.
    pub fn query_rejected() -> Self {
        Self::new(
            codes::BAD_REQUEST,
            kinds::QUERY_REJECTED,
            "Query not allowed for security reasons",
        )
    }

    /// Parameters that cannot be bound to the query
    pub fn invalid_parameters(details: impl Into<String>) -> Self {
        Self::new(
            codes::BAD_REQUEST,
            kinds::INVALID_PARAMETERS,
            format!("Invalid parameters: {}", details.into()),
        )
    }

    /// Missing or unverifiable credentials
    pub fn unauthorized() -> Self {
        Self::new(
            codes::UNAUTHORIZED,
            kinds::UNAUTHORIZED,
            "Invalid authentication token",
        )
    }

    /// Table outside the allow-list
    pub fn access_denied() -> Self {
        Self::new(
            codes::FORBIDDEN,
            kinds::ACCESS_DENIED,
            "Access to this table is not allowed",
        )
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(
            codes::NOT_FOUND,
            kinds::NOT_FOUND,
            format!("No route for {path}"),
        )
    }

    /// Request body above the configured limit
    pub fn payload_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            codes::PAYLOAD_TOO_LARGE,
            kinds::PAYLOAD_TOO_LARGE,
            format!("Request size {size} exceeds limit {limit}"),
        )
    }

    /// Store failure or timeout, already sanitized
    pub fn execution_failed(details: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, kinds::EXECUTION_FAILED, details)
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, kinds::INTERNAL, details)
    }

    pub fn service_unavailable() -> Self {
        Self::new(
            codes::SERVICE_UNAVAILABLE,
            kinds::SERVICE_UNAVAILABLE,
            "Service unavailable",
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.status, self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ApiError", 2)?;
        state.serialize_field("error", self.kind)?;
        state.serialize_field("message", &self.message)?;
        state.end()
    }
}

/// Wire shape of an error body, for clients and tests
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Result type for handler operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Relational store failures, as reported by a `QueryStore`
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Statement exceeded its deadline and was cancelled
    #[error("statement timed out")]
    Timeout,

    /// No connection could be obtained
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the statement
    #[error("statement failed: {message}")]
    Statement {
        /// SQLSTATE code when the store reported one
        sqlstate: Option<String>,
        message: String,
    },

    /// A bound value does not fit the type the store inferred
    #[error("cannot bind parameter: {0}")]
    Binding(String),

    /// A row could not be converted to JSON
    #[error("cannot decode row: {0}")]
    Decode(String),
}

/// Cache and counter backend failures. Never surfaced to callers of `POST /query`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Gateway-level errors (startup and serving)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Collaborator could not be constructed
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
