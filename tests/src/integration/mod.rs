//! End-to-end flows through the HTTP router with in-memory collaborators.

#[cfg(test)]
pub(crate) mod fixtures;

mod query_flow;
mod surface;
