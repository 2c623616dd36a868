//! Query path: caching, execution, introspection, statistics and the
//! orchestrator that ties them together.

pub mod cache;
pub mod engine;
pub mod gateway;
pub mod schema;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::CacheStore;
pub use engine::{apply_row_cap, Execution, ExecutionEngine, ExecutionError};
pub use gateway::{Collaborators, Gateway, QueryError};
pub use schema::{SchemaError, SchemaIntrospector};
pub use stats::{StatsError, StatsRecorder};
