// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Query Gateway - read-only SQL over HTTP with policy checks and caching.
//!
//! Authenticated callers submit SELECT/WITH queries. Each query is checked
//! against keyword, pattern and table allow-list rules, answered from a Redis
//! result cache when possible, and otherwise executed against PostgreSQL in a
//! read-only transaction under a row cap and a timeout.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            QUERY GATEWAY                                     │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  POST /query   GET /schema   GET /table/:name   GET /stats   GET /health    │
//! │         │                                                                    │
//! │  ┌──────┴─────────────────────────────────────────┐                         │
//! │  │              Middleware Stack                   │                         │
//! │  │  Tracing → CORS → Validation → Auth            │                         │
//! │  └──────┬──────────────────────────────────────────┘                         │
//! │         │                                                                    │
//! │  ┌──────┴──────────┐   ┌─────────────┐   ┌──────────────┐                   │
//! │  │     Gateway     │──►│  Validator  │   │ StatsRecorder│                   │
//! │  │  (orchestrator) │──►│ CacheStore  │   └──────┬───────┘                   │
//! │  │                 │──►│   Engine    │──────────┘                           │
//! │  │                 │──►│ Introspector│                                      │
//! │  └─────────────────┘   └──────┬──────┘                                      │
//! └──────────────────────────────┼───────────────────────────────────────────────┘
//!                                │
//!              ┌─────────────────┼──────────────────┐
//!              ▼                                    ▼
//!     PostgreSQL (QueryStore)            Redis (CacheBackend, CounterStore)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use query_gateway::{Collaborators, GatewayConfig, QueryGatewayService};
//!
//! let config = GatewayConfig::load()?;
//! let mut service = QueryGatewayService::new(config, collaborators, verifier)?;
//! service.start().await?;
//! ```
//!
//! # Security
//!
//! - Only SELECT and WITH statements; blocked keywords and injection patterns refused
//! - Every table named in FROM/JOIN must be on the allow-list
//! - Parameters travel as typed bind values, never spliced into SQL text
//! - Read-only transactions with a statement timeout and a row cap
//! - Store error text never reaches callers

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod query;
pub mod service;

// Re-exports for public API
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, ErrorBody, GatewayError};
pub use domain::types::*;
pub use ports::{CacheBackend, CounterStore, IdentityVerifier, QueryStore, TimeSource};
pub use query::{Collaborators, Gateway, QueryError};
pub use service::QueryGatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
