//! Domain layer: configuration, policy and pure query transformations.

pub mod binding;
pub mod cache_key;
pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use binding::{bind, BindingError, BoundQuery, SqlParam};
pub use cache_key::{cache_key, derive_key};
pub use config::*;
pub use error::*;
pub use policy::{QueryValidator, Rejection, SuspiciousPattern, ValidatedQuery, ValidationVerdict};
pub use types::*;
