//! Adapters for the query gateway.
//!
//! Infrastructure implementations of the outbound ports.

pub mod auth;
pub mod error_conversions;
pub mod memory;
pub mod postgres;
pub mod redis_cache;

pub use auth::StaticTokenVerifier;
pub use memory::{MemoryCache, MemoryCounters};
pub use postgres::PostgresStore;
pub use redis_cache::RedisCache;
